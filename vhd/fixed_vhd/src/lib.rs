// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Conversion of raw disk images into fixed VHD1 files.
//!
//! A fixed VHD is the raw disk contents followed by a single 512-byte
//! footer, so conversion is a streaming copy plus a footer append. See
//! [`vhd_format`] for the footer layout.

#![forbid(unsafe_code)]

use guid::Guid;
use std::fs::File;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::Write;
use std::time::SystemTime;
use thiserror::Error;
use vhd_format::SECTOR_SIZE;
use vhd_format::VhdFooter;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

/// An error encountered while converting a raw image to a VHD.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("raw image is empty")]
    ZeroSize,
    #[error("raw image size {0} is not a multiple of the 512 byte sector size")]
    SizeNotSectorAligned(u64),
    #[error("raw image size changed during conversion: expected {expected} bytes, found {found}")]
    SizeChanged { expected: u64, found: u64 },
    #[error("io error")]
    Io(#[from] io::Error),
}

/// An error encountered while opening a VHD.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OpenError {
    #[error("invalid VHD file size: {0}")]
    InvalidFileSize(u64),
    #[error("invalid VHD disk size: {0}")]
    InvalidDiskSize(u64),
    #[error("io error")]
    Io(#[from] io::Error),
    #[error("VHD file footer is missing")]
    InvalidFooterCookie,
    #[error("invalid VHD footer checksum")]
    InvalidFooterChecksum,
    #[error("unsupported VHD version: {0:#x}")]
    UnsupportedVersion(u32),
    #[error("not a fixed VHD")]
    NotFixed,
}

/// Builds the footer for a fixed VHD wrapping `raw_len` bytes of disk
/// contents.
///
/// `created_at` and `unique_id` are passed in rather than read from the
/// environment, so that callers control the stamped identity and tests are
/// deterministic.
pub fn build_footer(
    raw_len: u64,
    created_at: SystemTime,
    unique_id: Guid,
) -> Result<VhdFooter, ConvertError> {
    if raw_len == 0 {
        return Err(ConvertError::ZeroSize);
    }
    if raw_len % SECTOR_SIZE != 0 {
        return Err(ConvertError::SizeNotSectorAligned(raw_len));
    }
    let footer = VhdFooter::new_fixed(raw_len, vhd_time_stamp(created_at), unique_id);
    let geometry = footer.disk_geometry;
    tracing::debug!(
        size = raw_len,
        cylinders = geometry.cylinders.get(),
        heads = geometry.heads,
        sectors_per_track = geometry.sectors_per_track,
        "computed fixed VHD footer"
    );
    Ok(footer)
}

/// Seconds since the VHD epoch for `time`, clamped into the field's range.
fn vhd_time_stamp(time: SystemTime) -> u32 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(elapsed) => VhdFooter::time_stamp_from_unix_secs(elapsed.as_secs()),
        // The clock predates the Unix epoch, let alone the VHD epoch.
        Err(_) => 0,
    }
}

/// Writes a fixed VHD to `out`: exactly `raw_len` bytes copied from `raw`,
/// followed by `footer`.
///
/// On success the output is `raw_len` plus [`VhdFooter::LEN`] bytes long.
/// On failure the output is left partially written; the caller is expected
/// to discard it.
pub fn write_fixed(
    raw: impl Read,
    raw_len: u64,
    mut out: impl Write,
    footer: &VhdFooter,
) -> Result<(), ConvertError> {
    let mut limited = raw.take(raw_len);
    let copied = io::copy(&mut limited, &mut out)?;
    if copied != raw_len {
        return Err(ConvertError::SizeChanged {
            expected: raw_len,
            found: copied,
        });
    }
    // The take caps the copy, so a source that grew since it was sized
    // would otherwise pass with its tail missing from the container.
    let mut probe = [0];
    if limited.into_inner().read(&mut probe)? != 0 {
        return Err(ConvertError::SizeChanged {
            expected: raw_len,
            found: raw_len + 1,
        });
    }
    out.write_all(footer.as_bytes())?;
    out.flush()?;
    tracing::debug!(size = raw_len, "wrote fixed VHD");
    Ok(())
}

/// Turns a raw image into a fixed VHD in place by appending a footer.
///
/// Returns the footer that was appended.
pub fn make_fixed(
    mut file: &File,
    created_at: SystemTime,
    unique_id: Guid,
) -> Result<VhdFooter, ConvertError> {
    let len = file.metadata()?.len();
    let footer = build_footer(len, created_at, unique_id)?;
    file.seek(io::SeekFrom::End(0))?;
    file.write_all(footer.as_bytes())?;
    Ok(footer)
}

/// Reads and validates the footer of a fixed VHD.
pub fn read_footer(mut file: &File) -> Result<VhdFooter, OpenError> {
    let len = file.metadata()?.len();
    if len < VhdFooter::LEN || len % SECTOR_SIZE != 0 {
        return Err(OpenError::InvalidFileSize(len));
    }
    file.seek(io::SeekFrom::End(-512))?;
    let mut footer: VhdFooter = FromZeros::new_zeroed();
    file.read_exact(footer.as_mut_bytes())?;
    validate_footer(&footer, len)?;
    Ok(footer)
}

/// Checks a footer's self-consistency against the length of the file that
/// holds it.
pub fn validate_footer(footer: &VhdFooter, file_len: u64) -> Result<(), OpenError> {
    if footer.cookie != VhdFooter::COOKIE_MAGIC {
        return Err(OpenError::InvalidFooterCookie);
    }
    if footer.checksum != footer.compute_checksum().to_be_bytes() {
        return Err(OpenError::InvalidFooterChecksum);
    }
    if footer.file_format_version != VhdFooter::FILE_FORMAT_VERSION_MAGIC.to_be_bytes() {
        return Err(OpenError::UnsupportedVersion(
            footer.file_format_version.into(),
        ));
    }
    // FUTURE: decode dynamic disk headers for inspection.
    if footer.disk_type != VhdFooter::DISK_TYPE_FIXED.to_be_bytes() {
        return Err(OpenError::NotFixed);
    }
    let disk_size = footer.current_size.into();
    let Some(max_disk_size) = file_len.checked_sub(VhdFooter::LEN) else {
        return Err(OpenError::InvalidFileSize(file_len));
    };
    if disk_size > max_disk_size || disk_size % SECTOR_SIZE != 0 {
        return Err(OpenError::InvalidDiskSize(disk_size));
    }
    Ok(())
}
