//! `find_first`/`find_next` directory enumeration with wildcard matching.

use crate::block::BlockDevice;
use crate::error::Result;
use crate::fat::dir::{DirEntry, ShortEntry};
use crate::fat::volume::Volume;
use crate::util::wildcard;

/// Output of one enumeration step: enough to answer `get_file_attributes`-
/// style queries without re-walking the directory.
#[derive(Debug, Clone)]
pub struct FindResult {
    pub short_name: [u8; 8],
    pub short_ext: [u8; 3],
    pub long_name: Option<crate::fat::dir::heapless_name::NameBuf>,
    pub attr: u8,
    pub size: u32,
    pub write_date: u16,
    pub write_time: u16,
}

impl FindResult {
    fn from_entry(entry: &DirEntry) -> Self {
        Self {
            short_name: entry.short.name,
            short_ext: entry.short.ext,
            long_name: entry.long_name.clone(),
            attr: entry.short.attr,
            size: entry.short.file_size,
            write_date: entry.short.wrt_date,
            write_time: entry.short.wrt_time,
        }
    }
}

/// A live enumeration over one directory. Holds no reference to the volume
/// -- like file handles, it's resumed by passing the volume back in on each
/// call, per the arena ownership model.
#[derive(Debug, Clone)]
pub struct FindIter {
    pub lun: u8,
    pub dir_cluster: u32,
    pub pattern: heapless_pattern::PatternBuf,
    pub next_index: u32,
    pub done: bool,
}

pub mod heapless_pattern {
    pub const MAX_PATTERN_LEN: usize = 260;

    #[derive(Debug, Clone)]
    pub struct PatternBuf {
        buf: [u8; MAX_PATTERN_LEN],
        len: usize,
    }

    impl PatternBuf {
        pub fn from_str(s: &str) -> Self {
            let mut buf = [0u8; MAX_PATTERN_LEN];
            let bytes = s.as_bytes();
            let len = bytes.len().min(MAX_PATTERN_LEN);
            buf[..len].copy_from_slice(&bytes[..len]);
            Self { buf, len }
        }

        pub fn as_str(&self) -> &str {
            core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
        }
    }
}

impl Volume {
    /// Begins enumerating `dir_cluster` against `pattern`, returning the
    /// first match immediately (or `None` if the directory has no matches
    /// at all).
    pub fn find_first<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        dir_cluster: u32,
        pattern: &str,
    ) -> Result<Option<(FindIter, FindResult)>> {
        let mut iter = FindIter {
            lun: self.lun,
            dir_cluster,
            pattern: heapless_pattern::PatternBuf::from_str(pattern),
            next_index: 0,
            done: false,
        };
        match self.find_next(dev, &mut iter)? {
            Some(result) => Ok(Some((iter, result))),
            None => Ok(None),
        }
    }

    /// Resumes `iter`, scanning forward from its last position for the next
    /// entry matching its pattern.
    pub fn find_next<D: BlockDevice>(&mut self, dev: &mut D, iter: &mut FindIter) -> Result<Option<FindResult>> {
        if iter.done {
            return Ok(None);
        }

        let pattern = iter.pattern.as_str();
        let mut result = None;
        let mut seen = 0u32;

        self.list_entries(dev, iter.dir_cluster, |entry| {
            seen += 1;
            if seen <= iter.next_index {
                return true;
            }

            let short_matches = short_name_as_str(&entry.short, |s| wildcard::matches(pattern, s));
            let long_matches = entry
                .long_name
                .as_ref()
                .map(|n| wildcard::matches(pattern, n.as_str()))
                .unwrap_or(false);

            if pattern.is_empty() || short_matches || long_matches {
                result = Some(FindResult::from_entry(entry));
                iter.next_index = seen;
                false
            } else {
                true
            }
        })?;

        if result.is_none() {
            iter.done = true;
        }
        Ok(result)
    }
}

fn short_name_as_str(short: &ShortEntry, f: impl FnOnce(&str) -> bool) -> bool {
    let mut combined = [0u8; 12];
    let mut len = 0;
    for &b in short.name.iter() {
        if b == b' ' {
            break;
        }
        combined[len] = b;
        len += 1;
    }
    let ext_len = short.ext.iter().take_while(|&&b| b != b' ').count();
    if ext_len > 0 {
        combined[len] = b'.';
        len += 1;
        for &b in short.ext[..ext_len].iter() {
            combined[len] = b;
            len += 1;
        }
    }
    core::str::from_utf8(&combined[..len]).map(f).unwrap_or(false)
}
