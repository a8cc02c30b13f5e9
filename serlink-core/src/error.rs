use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinkError>;

#[derive(Debug, Error)]
pub enum LinkError {
    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "could not open the serial port ({0}); try un- and replugging the device \
         or providing the correct port name"
    )]
    NoDeviceFound(String),
}

impl LinkError {
    /// Fold any failure into `NoDeviceFound`, keeping the underlying reason.
    pub(crate) fn into_no_device(self) -> Self {
        match self {
            Self::NoDeviceFound(_) => self,
            other => Self::NoDeviceFound(other.to_string()),
        }
    }
}
