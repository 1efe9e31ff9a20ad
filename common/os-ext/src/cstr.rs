//! Working with C strings.

use std::{
    borrow::Cow,
    ffi::{CStr, CString},
    io,
};

/// Conversion into a NUL-terminated string.
///
/// The wrapper functions in this crate accept regular Rust strings
/// wherever the underlying system call expects a NUL-terminated one.
/// If the string contains an interior NUL, conversion fails with `EINVAL`.
pub trait IntoCStr<'a>
{
    /// Perform the conversion.
    fn into_cstr(self) -> io::Result<Cow<'a, CStr>>;
}

impl<'a> IntoCStr<'a> for &'a CStr
{
    fn into_cstr(self) -> io::Result<Cow<'a, CStr>>
    {
        Ok(Cow::Borrowed(self))
    }
}

impl IntoCStr<'static> for CString
{
    fn into_cstr(self) -> io::Result<Cow<'static, CStr>>
    {
        Ok(Cow::Owned(self))
    }
}

impl<'a> IntoCStr<'a> for &'a str
{
    fn into_cstr(self) -> io::Result<Cow<'a, CStr>>
    {
        let cstring = CString::new(self)
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        Ok(Cow::Owned(cstring))
    }
}

impl IntoCStr<'static> for String
{
    fn into_cstr(self) -> io::Result<Cow<'static, CStr>>
    {
        let cstring = CString::new(self)
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        Ok(Cow::Owned(cstring))
    }
}
