use afinstr::{Address, Isa};
use log::info;

use crate::{
    algebra,
    formula::Formula,
    persist::CacheSession,
    refs::RefFormulasMap,
    term::Coeff,
    utils::{conf::AnalysisConfig, error::AfResult},
};

/// State shared by the analysis of every routine of one image.
///
/// Holds what the formula engine needs from its surroundings: the user
/// configuration, the register table of the image's architecture and the
/// identity of the image used to key its cache.
pub struct AnalysisContext<I: Isa> {
    pub config: AnalysisConfig,
    pub isa: I,
    /// Path or name of the analyzed image.
    pub image_name: String,
    /// Checksum of the analyzed image, computed by the caller.
    pub image_checksum: u32,
}

impl<I: Isa> AnalysisContext<I> {
    pub fn new(
        config: AnalysisConfig,
        isa: I,
        image_name: impl Into<String>,
        image_checksum: u32,
    ) -> Self {
        let image_name = image_name.into();
        info!(
            "Analyzing image `{}` (checksum 0x{:08x}, {})",
            image_name,
            image_checksum,
            isa.name()
        );
        Self {
            config,
            isa,
            image_name,
            image_checksum,
        }
    }

    /// Empty reference store for the routine entered at `routine_pc`.
    pub fn new_routine_map(&self, routine_pc: Address) -> RefFormulasMap {
        RefFormulasMap::new(routine_pc)
    }

    /// Open the persistent cache of the image, or `None` when caching is
    /// disabled by the configuration.
    pub fn begin_cache_session(&self) -> AfResult<Option<CacheSession>> {
        if !self.config.persistent_cache {
            return Ok(None);
        }
        CacheSession::open(&self.config, &self.image_name, self.image_checksum).map(Some)
    }

    /// Stack offset of `formula` on this architecture, see
    /// [`algebra::is_stack_reference`].
    pub fn is_stack_reference(&self, formula: &Formula) -> Option<Coeff> {
        algebra::is_stack_reference(formula, &self.isa)
    }
}
