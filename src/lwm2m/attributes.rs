//! Write-attributes parameters and their compact text form
//!
//! ```text
//! [pmin,pmax]lt:st:gt
//! [10,60]            periods only
//! 0:5:100            thresholds only
//! [,60]1.5::         any field may be left empty
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Bad attributes format {input:?}: {reason}")]
pub struct AttributesError {
    pub input: String,
    pub reason: &'static str,
}

/// Notification attributes for a write-attr request
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    /// Minimum period in seconds
    pub pmin: Option<u32>,
    /// Maximum period in seconds
    pub pmax: Option<u32>,
    /// Less than
    pub lt: Option<f64>,
    /// Step
    pub st: Option<f64>,
    /// Greater than
    pub gt: Option<f64>,
}

impl Attributes {
    pub fn periods(pmin: Option<u32>, pmax: Option<u32>) -> Self {
        Self {
            pmin,
            pmax,
            ..Default::default()
        }
    }

    /// Number of attributes that are set
    pub fn count(&self) -> usize {
        [self.pmin.is_some(), self.pmax.is_some()]
            .into_iter()
            .chain([self.lt.is_some(), self.st.is_some(), self.gt.is_some()])
            .filter(|set| *set)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

fn opt<T: fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.pmin.is_some() || self.pmax.is_some() {
            write!(f, "[{},{}]", opt(&self.pmin), opt(&self.pmax))?;
        }
        if self.lt.is_some() || self.st.is_some() || self.gt.is_some() {
            write!(f, "{}:{}:{}", opt(&self.lt), opt(&self.st), opt(&self.gt))?;
        }
        Ok(())
    }
}

impl FromStr for Attributes {
    type Err = AttributesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason| AttributesError {
            input: s.to_string(),
            reason,
        };
        let mut attributes = Attributes::default();
        let mut rest = s.trim();

        if let Some(periods) = rest.strip_prefix('[') {
            let end = periods.find(']').ok_or_else(|| fail("missing ']'"))?;
            let (pmin, pmax) = periods[..end]
                .split_once(',')
                .ok_or_else(|| fail("periods must be separated by ','"))?;
            attributes.pmin = parse_field(pmin).map_err(|_| fail("pmin is not an integer"))?;
            attributes.pmax = parse_field(pmax).map_err(|_| fail("pmax is not an integer"))?;
            rest = periods[end + 1..].trim_start();
        }

        if !rest.is_empty() {
            let fields: Vec<&str> = rest.split(':').collect();
            let [lt, st, gt] = fields.as_slice() else {
                return Err(fail("thresholds must be lt:st:gt"));
            };
            attributes.lt = parse_field(lt).map_err(|_| fail("lt is not a number"))?;
            attributes.st = parse_field(st).map_err(|_| fail("st is not a number"))?;
            attributes.gt = parse_field(gt).map_err(|_| fail("gt is not a number"))?;
        }

        Ok(attributes)
    }
}

fn parse_field<T: FromStr>(field: &str) -> Result<Option<T>, T::Err> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(None);
    }
    field.parse().map(Some)
}
