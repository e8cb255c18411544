use crate::constants::{
    EnvFlags, DEFAULT_BATCH_SIZE, DEFAULT_MAX_DBS, DEFAULT_MAX_READERS, DEFAULT_MODE,
};

/// Options for opening a database with [`Lmdb::open`](crate::Lmdb::open).
///
/// `NOTLS` is always added to `flags`. A sensible default flag is `WRITEMAP`,
/// which is what `Options::default()` uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Permissions for newly created files.
    pub mode: u32,

    /// Size of the engine's reader lock table.
    ///
    /// Running views and copies each hold one entry, and so do reset read
    /// handles kept for reuse. Together they never exceed the number of
    /// view permits, which is at most this.
    pub max_readers: u32,

    /// Maximum number of views and copies running at once. `None` means
    /// `max_readers`. Values above `max_readers` are clamped.
    pub max_concurrent_views: Option<u32>,

    /// Maximum number of named sub-databases.
    pub max_dbs: u32,

    /// Environment flags.
    pub flags: EnvFlags,

    /// Maximum number of updates committed together in one transaction.
    ///
    /// A reasonable starting value is the number of threads that could
    /// submit updates concurrently.
    pub batch_size: usize,

    /// Initial map size in bytes. `None` keeps whatever the engine has
    /// persisted (or its default for a new environment).
    pub map_size: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: DEFAULT_MODE,
            max_readers: DEFAULT_MAX_READERS,
            max_concurrent_views: None,
            max_dbs: DEFAULT_MAX_DBS,
            flags: EnvFlags::WRITEMAP,
            batch_size: DEFAULT_BATCH_SIZE,
            map_size: None,
        }
    }
}

impl Options {
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn max_readers(mut self, max_readers: u32) -> Self {
        self.max_readers = max_readers;
        self
    }

    pub fn max_concurrent_views(mut self, views: u32) -> Self {
        self.max_concurrent_views = Some(views);
        self
    }

    pub fn max_dbs(mut self, max_dbs: u32) -> Self {
        self.max_dbs = max_dbs;
        self
    }

    pub fn flags(mut self, flags: EnvFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn map_size(mut self, map_size: usize) -> Self {
        self.map_size = Some(map_size);
        self
    }

    /// Whether the environment will be opened read-only
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(EnvFlags::RDONLY)
    }

    /// Number of reader throttle permits
    pub(crate) fn view_permits(&self) -> u32 {
        let max = self.max_readers.max(1);
        self.max_concurrent_views.map_or(max, |views| views.clamp(1, max))
    }

    /// Batch size with the zero case treated as one
    pub(crate) fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_permits_follow_max_readers() {
        let options = Options::default().max_readers(8);
        assert_eq!(options.view_permits(), 8);
    }

    #[test]
    fn view_permits_are_clamped() {
        let options = Options::default().max_readers(4).max_concurrent_views(10);
        assert_eq!(options.view_permits(), 4);
        let options = Options::default().max_readers(4).max_concurrent_views(0);
        assert_eq!(options.view_permits(), 1);
        let options = Options::default().max_readers(4).max_concurrent_views(2);
        assert_eq!(options.view_permits(), 2);
    }

    #[test]
    fn zero_batch_size_runs_one_at_a_time() {
        assert_eq!(Options::default().batch_size(0).effective_batch_size(), 1);
    }
}
