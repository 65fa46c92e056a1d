//! objcdump reconstructs Objective-C `@interface`/`@protocol` declarations
//! from the runtime metadata in a Mach-O image.
//!
//! The pipeline per architecture slice is [`macho::MachO::parse`] →
//! [`objc::walk`] → [`emit::emit`]. [`dump`] runs it over every slice of a
//! thin or fat file.

use std::{fs, path::Path};

use tracing::{info, warn};

pub mod command;
pub mod emit;
pub mod error;
pub mod fat;
pub mod fixups;
pub mod header;
mod helpers;
pub mod machine;
pub mod macho;
pub mod objc;
pub mod options;
mod source;
pub mod types;

pub use error::{Error, Result};
pub use macho::{MachO, MachOFile};
pub use options::DumpOptions;

/// The outcome for one architecture slice.
#[derive(Debug)]
pub struct ArchDump {
    pub arch: String,
    /// The emitted text and the number of diagnostics recorded while walking.
    pub result: Result<(String, usize)>,
}

fn dump_image(image: &MachO, options: &DumpOptions) -> Result<(String, usize)> {
    let model = objc::walk(image, options)?;
    let text = emit::emit(&model, options);
    Ok((text, model.diagnostic_count()))
}

/// Dumps every slice of `bytes`, or only the one named by `options.arch`.
/// A slice that fails to parse or walk reports its error without affecting
/// the others.
pub fn dump(bytes: &[u8], options: &DumpOptions) -> Result<Vec<ArchDump>> {
    let file = MachOFile::parse(bytes)?;
    let mut slices = file.images();
    if let Some(arch) = &options.arch {
        slices.retain(|slice| &slice.arch_name == arch);
        if slices.is_empty() {
            return Err(Error::NoMatchingArchitecture(arch.clone()));
        }
    }

    Ok(slices
        .into_iter()
        .map(|slice| {
            let result = slice
                .image
                .map_err(Error::from)
                .and_then(|image| dump_image(&image, options));
            match &result {
                Ok((_, diagnostics)) => info!(arch = %slice.arch_name, diagnostics, "dumped slice"),
                Err(err) => warn!(arch = %slice.arch_name, %err, "slice failed"),
            }
            ArchDump {
                arch: slice.arch_name,
                result,
            }
        })
        .collect())
}

pub fn dump_path(path: impl AsRef<Path>, options: &DumpOptions) -> Result<Vec<ArchDump>> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| Error::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    dump(&bytes, options)
}

/// Architecture names of the slices in `bytes`, in file order.
pub fn list_arches(bytes: &[u8]) -> Result<Vec<String>> {
    let file = MachOFile::parse(bytes)?;
    Ok(file
        .images()
        .into_iter()
        .map(|slice| slice.arch_name)
        .collect())
}
