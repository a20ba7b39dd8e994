// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tool to convert raw disk images into fixed VHD images.

use clap::Parser;
use fixed_vhd::ConvertError;
use fixed_vhd::OpenError;
use fs_err::File;
use guid::Guid;
use std::io::BufReader;
use std::io::BufWriter;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;
use vhd_format::VhdFooter;

const ONE_MEGA_BYTE: u64 = 1024 * 1024;

#[derive(Debug, Error)]
enum Error {
    #[error("raw image file IO")]
    RawFile(#[source] std::io::Error),
    #[error("VHD image file IO")]
    VhdFile(#[source] std::io::Error),
    #[error("VHD image already exists. Use `--force` to overwrite.")]
    FileExists,
    #[error(
        "raw image size {0} is not a multiple of 1 MiB; resize the image before converting, \
         or pass `--allow-unaligned` to convert anyway"
    )]
    NotMegabyteAligned(u64),
    #[error("converting raw image")]
    Convert(#[from] ConvertError),
    #[error("reading VHD footer")]
    Open(#[from] OpenError),
}

/// Automation requires certain exit codes to be guaranteed
/// main matches Error enum to ExitCode
///
/// convert must return ErrorUnaligned when the raw image size needs padding
/// inspect must return ErrorInvalidVhd when footer validation fails
/// ExitCode::Error returned for all other errors
#[derive(Debug, Clone, Copy)]
#[repr(i32)]
enum ExitCode {
    Error = 1,
    ErrorUnaligned = 2,
    ErrorInvalidVhd = 3,
}

#[derive(Parser)]
#[clap(
    name = "vhdtool",
    about = "Tool to convert raw disk images into fixed VHD images."
)]
enum Options {
    /// Convert a raw disk image at `raw_path` into a fixed VHD image.
    ///
    /// Azure requires imported disks to be a whole number of MiB; resize the
    /// raw image with your imaging tool first if it is not.
    Convert {
        /// Raw disk image path
        raw_path: PathBuf,
        /// Output VHD image path
        #[clap(required_unless_present = "in_place", conflicts_with = "in_place")]
        vhd_path: Option<PathBuf>,
        /// Convert in place by appending the footer to the raw image itself
        #[clap(long)]
        in_place: bool,
        /// Force conversion. If the VHD path already exists, this flag allows
        /// the existing file to be overwritten.
        #[clap(long)]
        force: bool,
        /// Unique disk ID to stamp into the footer instead of generating a
        /// random one
        #[clap(long)]
        disk_id: Option<Guid>,
        /// Convert a raw image whose size is not a multiple of 1 MiB. The size
        /// must still be a multiple of 512 bytes. Azure rejects such images
        /// during import.
        #[clap(long)]
        allow_unaligned: bool,
    },
    /// Validate the VHD image at `vhd_path` and dump its footer to the
    /// console.
    Inspect {
        /// VHD image path
        vhd_path: PathBuf,
    },
}

fn extract_version(ver: u32) -> String {
    let major = ver >> 16;
    let minor = ver & 0xFFFF;
    format!("{major}.{minor}")
}

fn main() {
    let filter = if std::env::var(EnvFilter::DEFAULT_ENV).is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::default().add_directive(LevelFilter::INFO.into())
    };
    tracing_subscriber::fmt()
        .log_internal_errors(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    if let Err(e) = do_main() {
        let exit_code = match e {
            Error::NotMegabyteAligned(_) => ExitCode::ErrorUnaligned,
            Error::Convert(ConvertError::SizeNotSectorAligned(_) | ConvertError::ZeroSize) => {
                ExitCode::ErrorUnaligned
            }
            Error::Open(OpenError::Io(_)) => ExitCode::Error,
            Error::Open(_) => ExitCode::ErrorInvalidVhd,
            _ => ExitCode::Error,
        };

        eprintln!("EXIT CODE: {} ({:?})", exit_code as i32, exit_code);
        eprintln!("ERROR: {}", e);
        let mut error_source = std::error::Error::source(&e);
        while let Some(e2) = error_source {
            eprintln!("- {}", e2);
            error_source = e2.source();
        }

        std::process::exit(exit_code as i32);
    }
}

fn do_main() -> Result<(), Error> {
    let opt = Options::parse();

    match opt {
        Options::Convert {
            raw_path,
            vhd_path,
            in_place,
            force,
            disk_id,
            allow_unaligned,
        } => {
            let unique_id = disk_id.unwrap_or_else(Guid::new_random);
            if in_place {
                convert_in_place(raw_path, unique_id, allow_unaligned)
            } else {
                convert(raw_path, vhd_path.unwrap(), unique_id, force, allow_unaligned)
            }
        }
        Options::Inspect { vhd_path } => inspect(vhd_path),
    }
}

/// Azure only imports disks sized to a 1 MiB boundary. Sector alignment
/// alone still produces a structurally valid VHD, so this check lives in the
/// tool rather than the conversion itself.
fn check_megabyte_aligned(len: u64, allow_unaligned: bool) -> Result<(), Error> {
    if len % ONE_MEGA_BYTE != 0 {
        if !allow_unaligned {
            return Err(Error::NotMegabyteAligned(len));
        }
        tracing::warn!(
            size = len,
            "raw image is not sized to a 1 MiB boundary; Azure will reject the VHD during import"
        );
    }
    Ok(())
}

fn convert(
    raw_path: impl AsRef<Path>,
    vhd_path: impl AsRef<Path>,
    unique_id: Guid,
    force: bool,
    allow_unaligned: bool,
) -> Result<(), Error> {
    let raw = File::open(raw_path.as_ref()).map_err(Error::RawFile)?;
    let raw_len = raw.metadata().map_err(Error::RawFile)?.len();
    check_megabyte_aligned(raw_len, allow_unaligned)?;

    // Make sure that a file does not already exist.
    if Path::new(vhd_path.as_ref()).exists() {
        if force {
            println!(
                "File already exists. Recreating the file {:?}",
                vhd_path.as_ref()
            );
        } else {
            return Err(Error::FileExists);
        }
    }

    let footer = fixed_vhd::build_footer(raw_len, SystemTime::now(), unique_id)?;
    let vhd = File::create(vhd_path.as_ref()).map_err(Error::VhdFile)?;
    fixed_vhd::write_fixed(BufReader::new(raw), raw_len, BufWriter::new(vhd), &footer)?;

    println!(
        "Converted {:?} to fixed VHD {:?} ({} bytes, disk ID {})",
        raw_path.as_ref(),
        vhd_path.as_ref(),
        raw_len + VhdFooter::LEN,
        footer.unique_id
    );
    Ok(())
}

fn convert_in_place(
    raw_path: impl AsRef<Path>,
    unique_id: Guid,
    allow_unaligned: bool,
) -> Result<(), Error> {
    let raw = fs_err::OpenOptions::new()
        .read(true)
        .write(true)
        .open(raw_path.as_ref())
        .map_err(Error::RawFile)?;
    let raw_len = raw.metadata().map_err(Error::RawFile)?.len();
    check_megabyte_aligned(raw_len, allow_unaligned)?;

    let footer = fixed_vhd::make_fixed(raw.file(), SystemTime::now(), unique_id)?;

    println!(
        "Converted {:?} to fixed VHD in place ({} bytes, disk ID {})",
        raw_path.as_ref(),
        raw_len + VhdFooter::LEN,
        footer.unique_id
    );
    Ok(())
}

fn inspect(vhd_path: impl AsRef<Path>) -> Result<(), Error> {
    let vhd = File::open(vhd_path.as_ref()).map_err(Error::VhdFile)?;
    let footer = fixed_vhd::read_footer(vhd.file())?;

    print_tag("Cookie:", footer.cookie.get().to_be_bytes());
    println!("{0:<21} {1:#x}", "Features:", footer.features.get());
    println!(
        "{0:<21} {1}",
        "Format version:",
        extract_version(footer.file_format_version.get())
    );
    println!("{0:<21} {1:#x}", "Data offset:", footer.data_offset.get());
    println!(
        "{0:<21} {1} (seconds since 2000-01-01T00:00:00Z)",
        "Time stamp:",
        footer.time_stamp.get()
    );
    print_tag(
        "Creator application:",
        footer.creator_application.get().to_be_bytes(),
    );
    println!(
        "{0:<21} {1}",
        "Creator version:",
        extract_version(footer.creator_version.get())
    );
    print_tag(
        "Creator host OS:",
        footer.creator_host_os.get().to_be_bytes(),
    );
    println!("{0:<21} {1}", "Original size:", footer.original_size.get());
    println!("{0:<21} {1}", "Current size:", footer.current_size.get());
    let geometry = footer.disk_geometry;
    println!(
        "{0:<21} {1} cylinders, {2} heads, {3} sectors per track",
        "Geometry:",
        geometry.cylinders.get(),
        geometry.heads,
        geometry.sectors_per_track
    );
    println!("{0:<21} {1} (fixed)", "Disk type:", footer.disk_type.get());
    println!("{0:<21} {1:#010x}", "Checksum:", footer.checksum.get());
    println!("{0:<21} {1}", "Unique ID:", footer.unique_id);
    println!("{0:<21} {1}", "Saved state:", footer.saved_state);
    Ok(())
}

fn print_tag<const N: usize>(label: &str, bytes: [u8; N]) {
    println!("{0:<21} {1:?}", label, String::from_utf8_lossy(&bytes));
}
