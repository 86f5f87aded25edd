//! One analysis run's view of the persistent formula cache.
//!
//! The cache of an image lives next to the other caches of the cache
//! directory, named after the image and its checksum. A session reads the
//! previous cache (if it is still valid) and writes a complete new one to a
//! temporary sibling file. Committing copies forward every routine of the
//! previous cache that was not consumed, then atomically replaces the cache.
use std::{
    collections::BTreeSet,
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use afinstr::Address;
use log::{debug, info, warn};

use crate::{
    magic::CACHE_FILE_EXTENSION,
    persist::{reader::CacheReader, writer::CacheWriter},
    refs::RefFormulasMap,
    utils::{
        conf::AnalysisConfig,
        error::{AfError, AfResult},
    },
};

/// Path of the cache file of `image` (only its file name is used) for the
/// given image checksum.
pub fn cache_path_for(cache_dir: &Path, image: &str, checksum: u32) -> PathBuf {
    let image_name = Path::new(image)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| image.to_string());
    cache_dir.join(format!(
        "{image_name}-0x{checksum:08x}.{CACHE_FILE_EXTENSION}"
    ))
}

pub struct CacheSession {
    cache_path: PathBuf,
    temp_path: PathBuf,
    previous: Option<CacheReader<BufReader<File>>>,
    writer: Option<CacheWriter<BufWriter<File>>>,
    consumed: BTreeSet<Address>,
}

impl CacheSession {
    /// Open the cache of `image` according to `config`.
    ///
    /// Fails with [`AfError::CacheDisabled`] when the persistent cache is
    /// turned off, and with an I/O error when the new cache cannot be
    /// created. An unusable previous cache is not an error.
    pub fn open(config: &AnalysisConfig, image: &str, checksum: u32) -> AfResult<Self> {
        if !config.persistent_cache {
            return Err(AfError::CacheDisabled);
        }
        let cache_dir = config.cache_dir();
        std::fs::create_dir_all(&cache_dir)?;
        let cache_path = cache_path_for(&cache_dir, image, checksum);

        let previous = match File::open(&cache_path) {
            Ok(file) => match CacheReader::open_with_min_version(
                BufReader::new(file),
                checksum,
                config.effective_min_version(),
            ) {
                Ok(reader) => {
                    info!(
                        "Opened formula cache `{}` with {} routines",
                        cache_path.display(),
                        reader.routine_count()
                    );
                    Some(reader)
                }
                Err(e) => {
                    info!(
                        "Ignoring formula cache `{}`: {e}. Starting with an empty database",
                        cache_path.display()
                    );
                    None
                }
            },
            Err(e) => {
                debug!("No formula cache at `{}`: {e}", cache_path.display());
                None
            }
        };

        let mut temp_name = cache_path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);
        let writer = CacheWriter::create(BufWriter::new(File::create(&temp_path)?), checksum)?;

        Ok(Self {
            cache_path,
            temp_path,
            previous,
            writer: Some(writer),
            consumed: BTreeSet::new(),
        })
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// True if a valid previous cache was found.
    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    /// Load the cached formulas of the routine entered at `routine_pc`.
    ///
    /// A routine found in the previous cache is consumed: it is not copied
    /// forward on commit, even if its block turned out to be malformed, and
    /// must be stored again by the caller.
    pub fn fetch(&mut self, routine_pc: Address, map: &mut RefFormulasMap) -> bool {
        let Some(previous) = self.previous.as_mut() else {
            return false;
        };
        if previous.offset_of(routine_pc).is_none() {
            return false;
        }
        self.consumed.insert(routine_pc);
        previous.fetch_routine(routine_pc, map)
    }

    /// Write the formulas of a routine into the new cache.
    pub fn store(&mut self, routine_pc: Address, map: &RefFormulasMap) -> AfResult<u64> {
        let writer = self.writer.as_mut().ok_or(AfError::CacheDisabled)?;
        writer.save_routine(routine_pc, map)
    }

    /// Finalize the new cache and move it over the previous one.
    pub fn commit(mut self) -> AfResult<PathBuf> {
        let Some(writer) = self.writer.take() else {
            return Err(AfError::CacheDisabled);
        };
        match self.finalize(writer) {
            Ok(()) => Ok(self.cache_path.clone()),
            Err(e) => {
                warn!(
                    "Could not save formula cache `{}`: {e}",
                    self.cache_path.display()
                );
                if let Err(e) = std::fs::remove_file(&self.temp_path) {
                    debug!("Could not remove `{}`: {e}", self.temp_path.display());
                }
                Err(e)
            }
        }
    }

    fn finalize(&mut self, mut writer: CacheWriter<BufWriter<File>>) -> AfResult<()> {
        let mut carried = 0usize;
        if let Some(mut previous) = self.previous.take() {
            let pending: Vec<_> = previous
                .routines()
                .filter(|(pc, _)| !self.consumed.contains(pc) && !writer.contains(*pc))
                .collect();
            for (pc, offset) in pending {
                let mut map = RefFormulasMap::new(pc);
                if previous.load_routine_at(offset, &mut map).is_ok() {
                    writer.save_routine(pc, &map)?;
                    carried += 1;
                }
            }
        }

        let file = writer
            .finish()?
            .into_inner()
            .map_err(|e| AfError::IoError(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&self.temp_path, &self.cache_path)?;
        info!(
            "Saved formula cache `{}` ({} routines carried over from the previous run)",
            self.cache_path.display(),
            carried
        );
        Ok(())
    }

    /// Drop the new cache and keep the previous one untouched.
    pub fn abandon(mut self) {
        self.discard();
        info!("Discarded new formula cache for `{}`", self.cache_path.display());
    }

    fn discard(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.temp_path) {
                debug!("Could not remove `{}`: {e}", self.temp_path.display());
            }
        }
    }
}

impl Drop for CacheSession {
    fn drop(&mut self) {
        self.discard();
    }
}
