//! Job descriptor, workload kinds and per-job parameters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{CoreError, JobId};

/// Identifies which pluggable routine a job runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum WorkloadKind {
    /// SHA-256 nonce search against a hex prefix.
    HashSearch,
    /// Dense square matrix product.
    MatrixMultiply,
    /// Mandelbrot escape-time render.
    Fractal,
    /// Sum of squares, the software baseline task.
    #[default]
    SumSquares,
    /// A host-registered workload.
    Custom(String),
}

impl WorkloadKind {
    /// Wire name of the workload.
    pub fn as_str(&self) -> &str {
        match self {
            Self::HashSearch => "hash_search",
            Self::MatrixMultiply => "matrix_multiply",
            Self::Fractal => "fractal",
            Self::SumSquares => "sum_squares",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hash_search" | "hash" => Ok(Self::HashSearch),
            "matrix_multiply" | "matrix" => Ok(Self::MatrixMultiply),
            "fractal" | "mandelbrot" => Ok(Self::Fractal),
            "sum_squares" | "basic" => Ok(Self::SumSquares),
            other if is_custom_name(other) => Ok(Self::Custom(other.to_string())),
            other => Err(CoreError::UnknownWorkload(other.to_string())),
        }
    }
}

/// Custom names share the character set of job ids: ASCII alphanumerics,
/// `-`, `_` and `.`, not starting with `.`.
fn is_custom_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl From<WorkloadKind> for String {
    fn from(kind: WorkloadKind) -> Self {
        kind.as_str().to_string()
    }
}

impl TryFrom<String> for WorkloadKind {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Named per-job options such as target prefix, iteration cap or seed.
///
/// Stored ordered so the serialized form is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `key=value` pair as given on the command line.
    pub fn parse_pair(pair: &str) -> Result<(String, String), CoreError> {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(CoreError::MalformedParam(pair.to_string())),
        }
    }

    /// Insert a parameter, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Raw string value, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// String value or a default.
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parse a value of type `T`, returning `None` when absent.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, CoreError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| CoreError::InvalidParam {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// Parse a value of type `T`, falling back to `default` when absent.
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, CoreError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    /// Iterate over all parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no parameters are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The immutable input bundle defining one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    job_id: JobId,
    input_data: String,
    workload_kind: WorkloadKind,
    params: Params,
}

impl JobDescriptor {
    /// Create a new JobDescriptor with no parameters.
    pub fn new(job_id: JobId, input_data: impl Into<String>, workload_kind: WorkloadKind) -> Self {
        Self {
            job_id,
            input_data: input_data.into(),
            workload_kind,
            params: Params::new(),
        }
    }

    /// Builder method to add a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key, value);
        self
    }

    /// Builder method to replace the whole parameter set.
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Job identifier.
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Opaque consumer input.
    pub fn input_data(&self) -> &str {
        &self.input_data
    }

    /// Workload to run.
    pub fn workload_kind(&self) -> &WorkloadKind {
        &self.workload_kind
    }

    /// Per-job parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }
}
