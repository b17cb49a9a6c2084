use crate::censoring::CensoringType;
use crate::error::LikelihoodError;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// Interval-censoring columns: the regime of each row and the two bounds
/// it may read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalCensoring {
    pub ctype: Vec<CensoringType>,
    pub ltime: Array1<f64>,
    pub rtime: Array1<f64>,
}

/// Row-aligned observation arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationBatch {
    pub t0: Array1<f64>,
    pub t: Array1<f64>,
    pub d: Array1<f64>,
    pub wt: Array1<f64>,
    pub interval: Option<IntervalCensoring>,
}

impl ObservationBatch {
    pub fn new(
        t0: Array1<f64>,
        t: Array1<f64>,
        d: Array1<f64>,
        wt: Array1<f64>,
    ) -> Result<Self, LikelihoodError> {
        let batch = Self {
            t0,
            t,
            d,
            wt,
            interval: None,
        };
        batch.validate()?;
        Ok(batch)
    }

    /// Unit weights and zero entry times.
    pub fn from_exit_times(t: Array1<f64>, d: Array1<f64>) -> Result<Self, LikelihoodError> {
        let n = t.len();
        Self::new(Array1::zeros(n), t, d, Array1::ones(n))
    }

    /// Attaches interval-censoring columns.
    ///
    /// A row only needs finite, positive values in the columns its regime
    /// reads: `ltime` for exact, right and interval rows, `rtime` for left
    /// and interval rows. The other column may hold anything, including NaN.
    pub fn with_interval_censoring(
        mut self,
        ctype: Vec<CensoringType>,
        ltime: Array1<f64>,
        rtime: Array1<f64>,
    ) -> Result<Self, LikelihoodError> {
        self.interval = Some(IntervalCensoring {
            ctype,
            ltime,
            rtime,
        });
        self.validate()?;
        Ok(self)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.t.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn interval(&self) -> Result<&IntervalCensoring, LikelihoodError> {
        self.interval
            .as_ref()
            .ok_or(LikelihoodError::MissingIntervalCensoring)
    }

    pub fn validate(&self) -> Result<(), LikelihoodError> {
        let n = self.t.len();
        check_len("entry times", n, self.t0.len())?;
        check_len("event indicators", n, self.d.len())?;
        check_len("importance weights", n, self.wt.len())?;
        check_finite("t0", self.t0.view())?;
        check_finite("t", self.t.view())?;
        check_finite("wt", self.wt.view())?;
        for (row, (&entry, &exit)) in self.t0.iter().zip(self.t.iter()).enumerate() {
            if entry < 0.0 || entry > exit {
                return Err(LikelihoodError::InvalidInterval { row, entry, exit });
            }
        }
        for (row, &value) in self.d.iter().enumerate() {
            if value != 0.0 && value != 1.0 {
                return Err(LikelihoodError::InvalidEventIndicator { row, value });
            }
        }
        if let Some(interval) = &self.interval {
            check_len("censoring types", n, interval.ctype.len())?;
            check_len("left times", n, interval.ltime.len())?;
            check_len("right times", n, interval.rtime.len())?;
            for (row, ctype) in interval.ctype.iter().enumerate() {
                let (l, r) = (interval.ltime[row], interval.rtime[row]);
                let needs_l = !matches!(ctype, CensoringType::Left);
                let needs_r = matches!(ctype, CensoringType::Left | CensoringType::Interval);
                if needs_l && !(l.is_finite() && l > 0.0) {
                    return Err(LikelihoodError::NonFiniteValue {
                        column: "ltime",
                        row,
                        value: l,
                    });
                }
                if needs_r && !(r.is_finite() && r > 0.0) {
                    return Err(LikelihoodError::NonFiniteValue {
                        column: "rtime",
                        row,
                        value: r,
                    });
                }
                if *ctype == CensoringType::Interval && l >= r {
                    return Err(LikelihoodError::InvalidInterval {
                        row,
                        entry: l,
                        exit: r,
                    });
                }
            }
        }
        Ok(())
    }
}

fn check_len(context: &'static str, expected: usize, found: usize) -> Result<(), LikelihoodError> {
    if expected != found {
        return Err(LikelihoodError::ShapeMismatch {
            context,
            expected,
            found,
        });
    }
    Ok(())
}

fn check_finite(column: &'static str, values: ArrayView1<'_, f64>) -> Result<(), LikelihoodError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(row) => Err(LikelihoodError::NonFiniteValue {
            column,
            row,
            value: values[row],
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = ObservationBatch::new(
            array![0.0, 0.0],
            array![1.0, 2.0],
            array![1.0],
            array![1.0, 1.0],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LikelihoodError::ShapeMismatch {
                context: "event indicators",
                ..
            }
        ));
    }

    #[test]
    fn entry_after_exit_is_rejected() {
        let err = ObservationBatch::new(array![3.0], array![2.0], array![0.0], array![1.0])
            .unwrap_err();
        assert!(matches!(err, LikelihoodError::InvalidInterval { row: 0, .. }));
    }

    #[test]
    fn degenerate_interval_is_allowed() {
        assert!(ObservationBatch::new(array![2.0], array![2.0], array![0.0], array![1.0]).is_ok());
    }

    #[test]
    fn event_indicator_must_be_binary() {
        let err = ObservationBatch::from_exit_times(array![1.0], array![0.5]).unwrap_err();
        assert!(matches!(err, LikelihoodError::InvalidEventIndicator { .. }));
    }

    #[test]
    fn unused_bound_may_be_missing() {
        let batch = ObservationBatch::from_exit_times(array![1.0, 2.0, 3.0], array![1.0, 0.0, 0.0])
            .unwrap()
            .with_interval_censoring(
                vec![
                    CensoringType::Exact,
                    CensoringType::Right,
                    CensoringType::Left,
                ],
                array![1.0, 2.0, f64::NAN],
                array![f64::NAN, f64::NAN, 3.0],
            );
        assert!(batch.is_ok());
    }

    #[test]
    fn interval_rows_need_ordered_bounds() {
        let err = ObservationBatch::from_exit_times(array![1.0], array![0.0])
            .unwrap()
            .with_interval_censoring(vec![CensoringType::Interval], array![2.0], array![1.0])
            .unwrap_err();
        assert!(matches!(err, LikelihoodError::InvalidInterval { .. }));
    }

    #[test]
    fn missing_interval_columns_are_reported() {
        let batch = ObservationBatch::from_exit_times(array![1.0], array![1.0]).unwrap();
        assert_eq!(
            batch.interval().unwrap_err(),
            LikelihoodError::MissingIntervalCensoring
        );
    }
}
