//! Pull-based operator contract and the in-memory scan.

use std::rc::Rc;

use crate::error::Result;
use crate::{Field, Row};

/// Open-next-close iterator shared by scans and joins.
///
/// `next()` returns `Ok(None)` as the terminal sentinel; once returned it is
/// returned on every later call.
pub trait Operator {
    /// Type of every field in the produced rows.
    type Field;

    fn open(&mut self) -> Result<()>;

    fn next(&mut self) -> Result<Option<Row<Self::Field>>>;

    fn close(&mut self) -> Result<()>;
}

/// Row source over an already materialized, shared set of rows.
///
/// `open()` rewinds, so the same rows can feed any number of joins.
#[derive(Debug)]
pub struct ScanOperator<T = Field> {
    rows: Rc<[Row<T>]>,
    pos: usize,
}

impl<T> Clone for ScanOperator<T> {
    fn clone(&self) -> Self {
        Self {
            rows: Rc::clone(&self.rows),
            pos: self.pos,
        }
    }
}

impl<T> ScanOperator<T> {
    pub fn new(rows: Vec<Row<T>>) -> Self {
        Self {
            rows: rows.into(),
            pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<T> Operator for ScanOperator<T> {
    type Field = T;

    fn open(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    #[inline]
    fn next(&mut self) -> Result<Option<Row<T>>> {
        let row = self.rows.get(self.pos).cloned();
        if row.is_some() {
            self.pos += 1;
        }
        Ok(row)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Builds rows from integer slices. Handy for tests and benches.
pub fn rows_from<I, R>(rows: I) -> Vec<Row>
where
    I: IntoIterator<Item = R>,
    R: AsRef<[Field]>,
{
    rows.into_iter().map(|r| Row::from(r.as_ref())).collect()
}
