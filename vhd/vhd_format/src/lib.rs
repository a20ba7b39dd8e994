// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! VHD1 file format definitions for fixed (fully-allocated) disks.
//!
//! A fixed VHD is the raw disk contents followed by a single 512-byte
//! footer; the footer is the only metadata in the file. Dynamic and
//! differencing disk structures are deliberately not defined here.

#![no_std]

use self::packed_nums::*;
use guid::Guid;
use static_assertions::const_assert;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

#[allow(non_camel_case_types)]
mod packed_nums {
    pub type u16_be = zerocopy::U16<zerocopy::BigEndian>;
    pub type u32_be = zerocopy::U32<zerocopy::BigEndian>;
    pub type u64_be = zerocopy::U64<zerocopy::BigEndian>;
}

/// The sector granularity of the format. Disk contents must be a multiple
/// of this size, as is the footer itself.
pub const SECTOR_SIZE: u64 = 512;

#[repr(C)]
#[derive(Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct VhdFooter {
    pub cookie: u64_be,
    pub features: u32_be,
    pub file_format_version: u32_be,
    pub data_offset: u64_be,
    pub time_stamp: u32_be,
    pub creator_application: u32_be,
    pub creator_version: u32_be,
    pub creator_host_os: u32_be,
    pub original_size: u64_be,
    pub current_size: u64_be,
    pub disk_geometry: DiskGeometry,
    pub disk_type: u32_be,
    pub checksum: u32_be,
    pub unique_id: Guid,
    pub saved_state: u8,
    pub reserved: [u8; 427],
}

const_assert!(size_of::<VhdFooter>() == 512);

impl VhdFooter {
    pub const LEN: u64 = 512;

    pub const COOKIE_MAGIC: u64_be = u64_be::from_bytes(*b"conectix");
    pub const FEATURE_MASK: u32 = 0x2;
    pub const FILE_FORMAT_VERSION_MAGIC: u32 = 0x00010000;
    pub const FIXED_DATA_OFFSET: u64 = !0;
    pub const CREATOR_APPLICATION_MAGIC: u32_be = u32_be::from_bytes(*b"win ");
    pub const CREATOR_VERSION_MAGIC: u32 = 0x00060003;
    pub const CREATOR_HOST_OS_MAGIC: u32_be = u32_be::from_bytes(*b"Wi2k");
    pub const DISK_TYPE_FIXED: u32 = 2;

    /// Seconds from the Unix epoch to the VHD time stamp epoch,
    /// 2000-01-01T00:00:00Z.
    pub const TIME_STAMP_EPOCH_UNIX_SECS: u64 = 946_684_800;

    /// Creates a fully-populated footer for a fixed VHD of `size` bytes.
    ///
    /// `size` must be a multiple of [`SECTOR_SIZE`]; the advisory CHS
    /// geometry is derived from it. `time_stamp` is in VHD epoch seconds,
    /// see [`VhdFooter::time_stamp_from_unix_secs`].
    pub fn new_fixed(size: u64, time_stamp: u32, unique_id: Guid) -> Self {
        let mut footer = Self {
            cookie: Self::COOKIE_MAGIC,
            features: Self::FEATURE_MASK.into(),
            file_format_version: Self::FILE_FORMAT_VERSION_MAGIC.into(),
            data_offset: Self::FIXED_DATA_OFFSET.into(),
            time_stamp: time_stamp.into(),
            creator_application: Self::CREATOR_APPLICATION_MAGIC,
            creator_version: Self::CREATOR_VERSION_MAGIC.into(),
            creator_host_os: Self::CREATOR_HOST_OS_MAGIC,
            original_size: size.into(),
            current_size: size.into(),
            disk_geometry: DiskGeometry::from_sector_count(size / SECTOR_SIZE),
            disk_type: Self::DISK_TYPE_FIXED.into(),
            ..FromZeros::new_zeroed()
        };

        footer.unique_id = unique_id;
        footer.checksum = footer.compute_checksum().into();
        footer
    }

    /// Converts a time in seconds since the Unix epoch into a VHD time
    /// stamp. Times before the VHD epoch clamp to 0, and times past the
    /// field's range (in 2136) clamp to `u32::MAX`.
    pub fn time_stamp_from_unix_secs(unix_secs: u64) -> u32 {
        u32::try_from(unix_secs.saturating_sub(Self::TIME_STAMP_EPOCH_UNIX_SECS))
            .unwrap_or(u32::MAX)
    }

    pub fn compute_checksum(&self) -> u32 {
        !(self.as_bytes().iter().map(|b| *b as u32).sum::<u32>()
            - self
                .checksum
                .as_bytes()
                .iter()
                .map(|b| *b as u32)
                .sum::<u32>())
    }
}

/// The CHS geometry advertised in the footer, packed in field order
/// (cylinders, heads, sectors per track).
///
/// The geometry is advisory. It may address fewer sectors than the disk
/// holds; readers size the disk from `current_size`, never from here.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct DiskGeometry {
    pub cylinders: u16_be,
    pub heads: u8,
    pub sectors_per_track: u8,
}

const_assert!(size_of::<DiskGeometry>() == 4);

impl DiskGeometry {
    /// The largest sector count representable as CHS (65535 cylinders, 16
    /// heads, 255 sectors per track). Larger disks clamp to this.
    pub const MAX_CHS_SECTORS: u64 = 65535 * 16 * 255;

    /// Computes the geometry for a disk of `total_sectors` sectors using
    /// the algorithm from the VHD specification, so that all producers
    /// advertise identical geometry for identical disk sizes.
    pub fn from_sector_count(total_sectors: u64) -> Self {
        let sectors = total_sectors.min(Self::MAX_CHS_SECTORS);

        let mut sectors_per_track;
        let mut heads;
        let mut cylinders_times_heads;
        if sectors >= 65535 * 16 * 63 {
            sectors_per_track = 255;
            heads = 16;
            cylinders_times_heads = sectors / sectors_per_track;
        } else {
            sectors_per_track = 17;
            cylinders_times_heads = sectors / sectors_per_track;

            heads = ((cylinders_times_heads + 1023) >> 10).max(4);

            if cylinders_times_heads >= (heads << 10) || heads > 16 {
                // Too many cylinders, try 31 sectors per track.
                sectors_per_track = 31;
                heads = 16;
                cylinders_times_heads = sectors / sectors_per_track;
            }
            if cylinders_times_heads >= (heads << 10) {
                // Still too many, use the maximum of 63.
                sectors_per_track = 63;
                heads = 16;
                cylinders_times_heads = sectors / sectors_per_track;
            }
        }

        DiskGeometry {
            cylinders: ((cylinders_times_heads / heads) as u16).into(),
            heads: heads as u8,
            sectors_per_track: sectors_per_track as u8,
        }
    }

    /// The number of sectors addressable through this geometry.
    pub fn total_sectors(&self) -> u64 {
        self.cylinders.get() as u64 * self.heads as u64 * self.sectors_per_track as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    fn geometry(cylinders: u16, heads: u8, sectors_per_track: u8) -> DiskGeometry {
        DiskGeometry {
            cylinders: cylinders.into(),
            heads,
            sectors_per_track,
        }
    }

    #[test]
    fn test_geometry_small_disks() {
        assert_eq!(
            DiskGeometry::from_sector_count(MIB / SECTOR_SIZE),
            geometry(30, 4, 17)
        );
        assert_eq!(
            DiskGeometry::from_sector_count(64 * MIB / SECTOR_SIZE),
            geometry(963, 8, 17)
        );
    }

    #[test]
    fn test_geometry_large_disks() {
        assert_eq!(
            DiskGeometry::from_sector_count(4 * GIB / SECTOR_SIZE),
            geometry(8322, 16, 63)
        );
        // One sector below the 255 sectors-per-track threshold.
        assert_eq!(
            DiskGeometry::from_sector_count(65535 * 16 * 63 - 1),
            geometry(65534, 16, 63)
        );
        // Exactly at the threshold.
        assert_eq!(
            DiskGeometry::from_sector_count(65535 * 16 * 63),
            geometry(16191, 16, 255)
        );
    }

    #[test]
    fn test_geometry_clamps_oversized_disks() {
        let max = DiskGeometry::from_sector_count(DiskGeometry::MAX_CHS_SECTORS);
        assert_eq!(max, geometry(65535, 16, 255));
        assert_eq!(DiskGeometry::from_sector_count(u64::MAX), max);
        assert_eq!(max.total_sectors(), DiskGeometry::MAX_CHS_SECTORS);
    }

    #[test]
    fn test_geometry_never_exceeds_disk() {
        for sectors in [
            MIB / SECTOR_SIZE,
            3 * MIB / SECTOR_SIZE,
            GIB / SECTOR_SIZE,
            127 * GIB / SECTOR_SIZE,
        ] {
            let geometry = DiskGeometry::from_sector_count(sectors);
            assert!(geometry.total_sectors() <= sectors);
        }
    }

    #[test]
    fn test_footer_layout() {
        let footer = VhdFooter::new_fixed(MIB, 0x01020304, Guid::default());
        let bytes = footer.as_bytes();
        assert_eq!(bytes.len(), 512);
        assert_eq!(&bytes[0..8], b"conectix");
        assert_eq!(&bytes[24..28], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[28..32], b"win ");
        assert_eq!(&bytes[36..40], b"Wi2k");
        // cylinders 30, heads 4, sectors per track 17
        assert_eq!(&bytes[56..60], &[0x00, 0x1e, 0x04, 0x11]);
        assert_eq!(bytes[84], 0);
        assert!(bytes[85..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_footer_sizes_match() {
        let footer = VhdFooter::new_fixed(4 * GIB, 0, Guid::default());
        assert_eq!(footer.original_size.get(), 4 * GIB);
        assert_eq!(footer.current_size.get(), footer.original_size.get());
        assert_eq!(footer.disk_type.get(), VhdFooter::DISK_TYPE_FIXED);
        assert_eq!(footer.data_offset.get(), u64::MAX);
        assert_eq!(footer.saved_state, 0);
    }

    #[test]
    fn test_checksum() {
        let footer = VhdFooter::new_fixed(MIB, 946_684_800, Guid::default());
        assert_eq!(footer.checksum.get(), footer.compute_checksum());

        // Ones'-complement of the byte sum with the checksum field zeroed.
        let mut zeroed = footer;
        zeroed.checksum = 0.into();
        let sum = zeroed.as_bytes().iter().map(|b| *b as u32).sum::<u32>();
        assert_eq!(footer.checksum.get(), !sum);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let footer = VhdFooter::new_fixed(MIB, 0, Guid::default());
        let mut corrupt = footer;
        corrupt.current_size = (2 * MIB).into();
        assert_ne!(corrupt.checksum.get(), corrupt.compute_checksum());
    }

    #[test]
    fn test_time_stamp_conversion() {
        // 2000-01-01T00:00:00Z.
        let epoch = VhdFooter::TIME_STAMP_EPOCH_UNIX_SECS;
        assert_eq!(VhdFooter::time_stamp_from_unix_secs(epoch), 0);
        assert_eq!(VhdFooter::time_stamp_from_unix_secs(epoch + 1), 1);
        // Pre-epoch times clamp to zero rather than wrapping.
        assert_eq!(VhdFooter::time_stamp_from_unix_secs(0), 0);
        assert_eq!(VhdFooter::time_stamp_from_unix_secs(epoch - 1), 0);
        // As does the far future.
        assert_eq!(VhdFooter::time_stamp_from_unix_secs(u64::MAX), u32::MAX);
    }

    #[test]
    fn test_footers_identical_except_identity() {
        let a = VhdFooter::new_fixed(MIB, 100, Guid::default());
        let b = VhdFooter::new_fixed(MIB, 100, Guid::default());
        assert_eq!(a.as_bytes(), b.as_bytes());
    }
}
