use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MinifyError {
    #[error("markup parse error at byte {offset}: {reason}")]
    Parse { offset: usize, reason: &'static str },
}

impl MinifyError {
    pub fn parse(offset: usize, reason: &'static str) -> Self {
        Self::Parse { offset, reason }
    }
}
