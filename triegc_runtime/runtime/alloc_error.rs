use std::fmt;

pub type AllocResult<T> = Result<T, AllocError>;

/// Reason an allocation could not be satisfied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocErrorKind {
    /// The system allocator is out of memory
    OutOfMemory,
    /// The requested size cannot be allocated at all
    InvalidSize,
}

/// A failed tracked allocation. Only returned when the `alloc_error` feature
/// is enabled, otherwise allocation failure terminates the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocError {
    kind: AllocErrorKind,
    size: usize,
}

impl AllocError {
    pub fn oom(size: usize) -> AllocError {
        AllocError {
            kind: AllocErrorKind::OutOfMemory,
            size,
        }
    }

    pub fn layout(size: usize) -> AllocError {
        AllocError {
            kind: AllocErrorKind::InvalidSize,
            size,
        }
    }

    pub fn kind(&self) -> AllocErrorKind {
        self.kind
    }

    /// Size of the failed request in bytes
    pub fn size(&self) -> usize {
        self.size
    }
}

impl From<triegc::AllocError> for AllocError {
    fn from(error: triegc::AllocError) -> Self {
        match error {
            triegc::AllocError::InvalidLayout { size } => AllocError::layout(size),
            triegc::AllocError::OutOfMemory(layout) => AllocError::oom(layout.size()),
        }
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AllocErrorKind::OutOfMemory => {
                write!(f, "Ran out of heap memory allocating {} bytes", self.size)
            }
            AllocErrorKind::InvalidSize => {
                write!(f, "Cannot allocate {} bytes", self.size)
            }
        }
    }
}

impl std::error::Error for AllocError {}

#[cfg(test)]
mod tests {
    use std::alloc::Layout;

    use super::*;

    #[test]
    fn test_from_core_error() {
        let layout = Layout::from_size_align(64, 16).unwrap();
        let error = AllocError::from(triegc::AllocError::OutOfMemory(layout));
        assert_eq!(error.kind(), AllocErrorKind::OutOfMemory);
        assert_eq!(error.size(), 64);

        let error = AllocError::from(triegc::AllocError::InvalidLayout { size: usize::MAX });
        assert_eq!(error, AllocError::layout(usize::MAX));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            AllocError::oom(8).to_string(),
            "Ran out of heap memory allocating 8 bytes"
        );
    }
}
