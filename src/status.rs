//! Integer status codes for crossing a binary boundary.
//!
//! Loadable modules built separately cannot share Rust error values, so every
//! result handed across is flattened into a [`Status`].

use crate::error::DiskError;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    ParameterInvalid = -1,
    DeviceUnavailable = -2,
    GeometryQueryFailed = -3,
    BoundaryViolation = -4,
    WindowMisaligned = -5,
    NotSupported = -6,
    SectorCountOverflow = -7,
    Closed = -8,
    Io = -9,
}

impl Status {
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }

    #[inline]
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let status = match code {
            0 => Status::Ok,
            -1 => Status::ParameterInvalid,
            -2 => Status::DeviceUnavailable,
            -3 => Status::GeometryQueryFailed,
            -4 => Status::BoundaryViolation,
            -5 => Status::WindowMisaligned,
            -6 => Status::NotSupported,
            -7 => Status::SectorCountOverflow,
            -8 => Status::Closed,
            -9 => Status::Io,
            _ => return None,
        };
        Some(status)
    }

    pub fn from_result<T>(result: &Result<T, DiskError>) -> Self {
        match result {
            Ok(_) => Status::Ok,
            Err(e) => Status::from(e),
        }
    }
}

impl From<&DiskError> for Status {
    fn from(error: &DiskError) -> Self {
        match error {
            DiskError::ParameterInvalid(_) => Status::ParameterInvalid,
            DiskError::DeviceUnavailable { .. } => Status::DeviceUnavailable,
            DiskError::GeometryQueryFailed => Status::GeometryQueryFailed,
            DiskError::BoundaryViolation { .. } => Status::BoundaryViolation,
            DiskError::WindowMisaligned { .. } => Status::WindowMisaligned,
            DiskError::NotSupported(_) => Status::NotSupported,
            DiskError::SectorCountOverflow(_) => Status::SectorCountOverflow,
            DiskError::Closed => Status::Closed,
            DiskError::Io(_) => Status::Io,
        }
    }
}
