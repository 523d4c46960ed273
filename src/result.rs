//! Result record produced by a harness run.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::MarkError;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    UnrecoverableError,
    InvalidConfig,
    DeviceError,
}

impl ResultCode {
    /// Stable integer form, used as the process exit status by the CLI.
    pub fn code(self) -> i32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::UnrecoverableError => -1,
            ResultCode::InvalidConfig => -2,
            ResultCode::DeviceError => -3,
        }
    }

    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

impl From<&MarkError> for ResultCode {
    fn from(err: &MarkError) -> Self {
        match err {
            MarkError::BufferAtMaximum { .. } => ResultCode::UnrecoverableError,
            MarkError::InvalidConfig(_) => ResultCode::InvalidConfig,
            MarkError::Device(_) => ResultCode::DeviceError,
            // Monitor failures never reach a run result
            MarkError::MonitorSpawn(_) => ResultCode::UnrecoverableError,
        }
    }
}

/// Free-text report plus the single numeric measurement of a run.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct MarkResult {
    test_name: String,
    message: String,
    result_code: ResultCode,
    measurement: f64,
}

impl MarkResult {
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            message: String::new(),
            result_code: ResultCode::UnrecoverableError,
            measurement: 0.0,
        }
    }

    pub fn append_message(&mut self, text: &str) {
        self.message.push_str(text);
    }

    pub fn set_result_code(&mut self, code: ResultCode) {
        self.result_code = code;
    }

    pub fn set_measurement(&mut self, value: f64) {
        self.measurement = value;
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn result_code(&self) -> ResultCode {
        self.result_code
    }

    pub fn measurement(&self) -> f64 {
        self.measurement
    }
}
