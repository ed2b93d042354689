use crate::error::AllocError;

/// Knobs of a [`crate::MemAlloc`] instance.
///
/// ```
/// use firstfit::Config;
///
/// let config = Config::default().with_page_size(16 * 1024).with_log_events(false);
/// assert_eq!(config.page_size, Some(16 * 1024));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Page size used for the mapping threshold and for rounding mappings,
    /// instead of the one reported by the memory source. Must be a power of
    /// two and a multiple of the source's page size.
    pub page_size: Option<usize>,
    /// Emit a `debug` log record for every successful allocate, zero-allocate
    /// and release.
    pub log_events: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: None,
            log_events: true,
        }
    }
}

impl Config {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_log_events(mut self, log_events: bool) -> Self {
        self.log_events = log_events;
        self
    }

    /// Page size to use on top of a source whose pages are `source_page`
    /// bytes long.
    pub(crate) fn effective_page_size(&self, source_page: usize) -> Result<usize, AllocError> {
        let Some(page_size) = self.page_size else {
            return Ok(source_page);
        };

        if !page_size.is_power_of_two() {
            return Err(AllocError::InvalidConfig(format!(
                "page size {page_size} is not a power of two"
            )));
        }

        if page_size % source_page != 0 {
            return Err(AllocError::InvalidConfig(format!(
                "page size {page_size} is not a multiple of the source page size {source_page}"
            )));
        }

        Ok(page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_source() {
        let config = Config::default();

        assert!(config.log_events);
        assert_eq!(config.effective_page_size(4096).unwrap(), 4096);
    }

    #[test]
    fn override_must_be_compatible() {
        let ok = Config::default().with_page_size(16384);
        assert_eq!(ok.effective_page_size(4096).unwrap(), 16384);

        let odd = Config::default().with_page_size(5000);
        assert!(matches!(odd.effective_page_size(4096), Err(AllocError::InvalidConfig(_))));

        let smaller = Config::default().with_page_size(1024);
        assert!(matches!(smaller.effective_page_size(4096), Err(AllocError::InvalidConfig(_))));
    }
}
