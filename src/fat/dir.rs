//! The directory engine: 32-byte short entries, long-file-name entry chains,
//! and the directory-walking operations that the file handle and enumerator
//! layers build on.
//!
//! As with the BPB, every entry is decoded/encoded by explicit byte offset
//! rather than a `#[repr(packed)]` overlay, so that short and long entries
//! (which share the same 32-byte slot but interpret it completely
//! differently) can't be confused by the type system into looking alike.

use core::convert::TryInto;

use crate::block::BlockDevice;
use crate::error::{Error, Result};
use crate::fat::types::{
    attr, DIR_END_OF_DIR, DIR_ENTRY_SIZE, DIR_FREE_SLOT, DIR_KANJI_E5_ESCAPE, LFN_CHARS_PER_SLOT,
    LFN_LAST_ENTRY_FLAG, LFN_MAX_CHARS,
};
use crate::fat::volume::Volume;
use crate::util::time::{pack, unpack, DateTime};

/// A decoded short (8.3) directory entry, independent of where on disk it
/// lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortEntry {
    pub name: [u8; 8],
    pub ext: [u8; 3],
    pub attr: u8,
    pub crt_time_tenth: u8,
    pub crt_time: u16,
    pub crt_date: u16,
    pub lst_acc_date: u16,
    pub wrt_time: u16,
    pub wrt_date: u16,
    pub first_cluster: u32,
    pub file_size: u32,
}

impl ShortEntry {
    pub fn decode(slot: &[u8]) -> Self {
        let mut name: [u8; 8] = slot[0x00..0x08].try_into().unwrap();
        if name[0] == DIR_KANJI_E5_ESCAPE {
            name[0] = 0xE5;
        }
        Self {
            name,
            ext: slot[0x08..0x0B].try_into().unwrap(),
            attr: slot[0x0B],
            crt_time_tenth: slot[0x0D],
            crt_time: u16::from_le_bytes(slot[0x0E..0x10].try_into().unwrap()),
            crt_date: u16::from_le_bytes(slot[0x10..0x12].try_into().unwrap()),
            lst_acc_date: u16::from_le_bytes(slot[0x12..0x14].try_into().unwrap()),
            first_cluster: {
                let hi = u16::from_le_bytes(slot[0x14..0x16].try_into().unwrap()) as u32;
                let lo = u16::from_le_bytes(slot[0x1A..0x1C].try_into().unwrap()) as u32;
                (hi << 16) | lo
            },
            wrt_time: u16::from_le_bytes(slot[0x16..0x18].try_into().unwrap()),
            wrt_date: u16::from_le_bytes(slot[0x18..0x1A].try_into().unwrap()),
            file_size: u32::from_le_bytes(slot[0x1C..0x20].try_into().unwrap()),
        }
    }

    pub fn encode(&self, slot: &mut [u8]) {
        slot[0x00..0x08].copy_from_slice(&self.name);
        if slot[0x00] == 0xE5 {
            slot[0x00] = DIR_KANJI_E5_ESCAPE;
        }
        slot[0x08..0x0B].copy_from_slice(&self.ext);
        slot[0x0B] = self.attr;
        slot[0x0C] = 0; // nt_res
        slot[0x0D] = self.crt_time_tenth;
        slot[0x0E..0x10].copy_from_slice(&self.crt_time.to_le_bytes());
        slot[0x10..0x12].copy_from_slice(&self.crt_date.to_le_bytes());
        slot[0x12..0x14].copy_from_slice(&self.lst_acc_date.to_le_bytes());
        slot[0x14..0x16].copy_from_slice(&((self.first_cluster >> 16) as u16).to_le_bytes());
        slot[0x16..0x18].copy_from_slice(&self.wrt_time.to_le_bytes());
        slot[0x18..0x1A].copy_from_slice(&self.wrt_date.to_le_bytes());
        slot[0x1A..0x1C].copy_from_slice(&(self.first_cluster as u16).to_le_bytes());
        slot[0x1C..0x20].copy_from_slice(&self.file_size.to_le_bytes());
    }

    pub fn is_directory(&self) -> bool {
        self.attr & attr::DIRECTORY != 0
    }

    pub fn is_volume_label(&self) -> bool {
        self.attr & attr::VOLUME_ID != 0
    }

    /// The checksum tying a chain of LFN entries to this short entry. Sums
    /// all 11 raw name/ext bytes with a rotate-right-by-one each step.
    pub fn lfn_checksum(&self) -> u8 {
        let mut sum: u8 = 0;
        for &b in self.name.iter().chain(self.ext.iter()) {
            sum = ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b);
        }
        sum
    }

    pub fn created(&self) -> DateTime {
        unpack(self.crt_date, self.crt_time)
    }

    pub fn modified(&self) -> DateTime {
        unpack(self.wrt_date, self.wrt_time)
    }

    pub fn set_modified(&mut self, dt: DateTime) {
        let (date, time) = pack(dt);
        self.wrt_date = date;
        self.wrt_time = time;
        self.lst_acc_date = date;
    }

    pub fn set_created(&mut self, dt: DateTime) {
        let (date, time) = pack(dt);
        self.crt_date = date;
        self.crt_time = time;
        self.crt_time_tenth = 0;
    }
}

/// One decoded long-file-name slot: up to 13 UCS-2 code units plus its
/// sequence/checksum bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongEntrySlot {
    pub ordinal: u8,
    pub is_last: bool,
    pub checksum: u8,
    pub chars: [u16; LFN_CHARS_PER_SLOT],
}

const LFN_CHAR_OFFSETS: [usize; LFN_CHARS_PER_SLOT] =
    [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

impl LongEntrySlot {
    pub fn decode(slot: &[u8]) -> Self {
        let mut chars = [0u16; LFN_CHARS_PER_SLOT];
        for (i, &off) in LFN_CHAR_OFFSETS.iter().enumerate() {
            chars[i] = u16::from_le_bytes(slot[off..off + 2].try_into().unwrap());
        }
        Self {
            ordinal: slot[0] & !LFN_LAST_ENTRY_FLAG,
            is_last: slot[0] & LFN_LAST_ENTRY_FLAG != 0,
            checksum: slot[13],
            chars,
        }
    }

    pub fn encode(&self, slot: &mut [u8]) {
        slot[0] = self.ordinal | if self.is_last { LFN_LAST_ENTRY_FLAG } else { 0 };
        slot[11] = attr::LFN;
        slot[12] = 0; // type, always 0
        slot[13] = self.checksum;
        slot[26..28].copy_from_slice(&0u16.to_le_bytes()); // fst_clus_lo, always 0
        for (i, &off) in LFN_CHAR_OFFSETS.iter().enumerate() {
            slot[off..off + 2].copy_from_slice(&self.chars[i].to_le_bytes());
        }
    }
}

/// A located directory entry: the short entry itself, decoded long name (if
/// any), and enough positional information to rewrite or erase the slots it
/// occupies.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub short: ShortEntry,
    pub long_name: Option<heapless_name::NameBuf>,
    /// Cluster/offset of the short-entry slot (the one the chain ends at).
    pub short_slot: SlotLocation,
    /// Cluster/offset of the first LFN slot in the chain, if any (used when
    /// erasing the whole entry).
    pub first_slot: SlotLocation,
}

/// A fixed-capacity owned name buffer, sized for the worst case LFN length.
/// Kept in its own module purely to group the const-generic-free buffer with
/// its helpers.
pub mod heapless_name {
    use super::LFN_MAX_CHARS;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct NameBuf {
        buf: [u8; LFN_MAX_CHARS * 2],
        len: usize,
    }

    impl NameBuf {
        pub fn new() -> Self {
            Self { buf: [0; LFN_MAX_CHARS * 2], len: 0 }
        }

        pub fn push_utf8(&mut self, s: &str) -> bool {
            let bytes = s.as_bytes();
            if self.len + bytes.len() > self.buf.len() {
                return false;
            }
            self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
            self.len += bytes.len();
            true
        }

        pub fn as_str(&self) -> &str {
            core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
        }
    }
}

/// Where one 32-byte slot lives: the cluster it's in (0 for a FAT12/16
/// fixed-size root directory) and its byte offset within that region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLocation {
    pub cluster: u32,
    pub index_in_dir: u32,
}

impl Volume {
    fn slots_per_cluster(&self) -> u32 {
        self.bytes_per_cluster() / DIR_ENTRY_SIZE as u32
    }

    /// Translates the caller-facing "0 means root" convention to the real
    /// root cluster on FAT32, where the root directory is an ordinary
    /// cluster chain rather than a fixed region.
    fn root_aware_cluster(&self, dir_cluster: u32) -> u32 {
        if dir_cluster == 0 && self.fat_type == crate::fat::types::FatType::Fat32 {
            self.root_cluster
        } else {
            dir_cluster
        }
    }

    /// Reads the slot at `index_in_dir` of the directory rooted at
    /// `dir_cluster` (0 meaning the FAT12/16 fixed root) into `self.scratch`
    /// at the right sector, returning the in-sector byte offset.
    fn locate_slot<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        dir_cluster: u32,
        index_in_dir: u32,
    ) -> Result<Option<usize>> {
        let dir_cluster = self.root_aware_cluster(dir_cluster);
        let slots_per_sector = self.bytes_per_sector as u32 / DIR_ENTRY_SIZE as u32;
        let sector_in_region = index_in_dir / slots_per_sector;
        let offset = (index_in_dir % slots_per_sector) as usize * DIR_ENTRY_SIZE;

        let sector = if dir_cluster == 0 {
            if sector_in_region >= self.root_dir_sectors {
                return Ok(None);
            }
            self.root_dir_start + sector_in_region as u64
        } else {
            let slots_per_cluster = self.slots_per_cluster();
            let mut cluster = dir_cluster;
            let mut remaining_sectors = sector_in_region;
            let sectors_per_cluster = self.sectors_per_cluster as u32;
            let target_cluster_hop = remaining_sectors / sectors_per_cluster;
            for _ in 0..target_cluster_hop {
                let (next, is_eof) = self.next_cluster(dev, cluster)?;
                if is_eof {
                    return Ok(None);
                }
                cluster = next;
            }
            remaining_sectors %= sectors_per_cluster;
            let _ = slots_per_cluster;
            self.cluster_to_sector(cluster) + remaining_sectors as u64
        };

        if !dev.read(self.lun, self.scratch.as_mut_slice(), sector, 1) {
            return Err(Error::DiskAccessError);
        }
        Ok(Some(offset))
    }

    /// Writes `self.scratch`'s current sector back, at the same location
    /// `locate_slot` last resolved. Caller must not have issued another read
    /// in between.
    fn write_back_slot<D: BlockDevice>(&mut self, dev: &mut D, sector: u64) -> Result<()> {
        if !dev.write(self.lun, self.scratch.as_slice(), sector, 1) {
            return Err(Error::DiskAccessError);
        }
        Ok(())
    }

    fn slot_sector(&mut self, dev: &mut impl BlockDevice, dir_cluster: u32, index_in_dir: u32) -> Result<u64> {
        let dir_cluster = self.root_aware_cluster(dir_cluster);
        let slots_per_sector = self.bytes_per_sector as u32 / DIR_ENTRY_SIZE as u32;
        let sector_in_region = index_in_dir / slots_per_sector;
        if dir_cluster == 0 {
            return Ok(self.root_dir_start + sector_in_region as u64);
        }
        let sectors_per_cluster = self.sectors_per_cluster as u32;
        let mut cluster = dir_cluster;
        for _ in 0..(sector_in_region / sectors_per_cluster) {
            let (next, is_eof) = self.next_cluster(dev, cluster)?;
            if is_eof {
                return Err(Error::InternalError);
            }
            cluster = next;
        }
        Ok(self.cluster_to_sector(cluster) + (sector_in_region % sectors_per_cluster) as u64)
    }

    /// Walks every 32-byte slot of the directory rooted at `dir_cluster`
    /// (0 == FAT12/16 fixed root), feeding raw 32-byte slices plus their
    /// location to `f`. Stops at the end-of-directory marker or end of the
    /// fixed root region. `f` returns `true` to keep walking.
    fn for_each_slot<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        dir_cluster: u32,
        mut f: impl FnMut(&[u8; DIR_ENTRY_SIZE], SlotLocation) -> bool,
    ) -> Result<()> {
        let mut index = 0u32;
        loop {
            let offset = match self.locate_slot(dev, dir_cluster, index)? {
                Some(o) => o,
                None => return Ok(()),
            };
            let slot: [u8; DIR_ENTRY_SIZE] =
                self.scratch[offset..offset + DIR_ENTRY_SIZE].try_into().unwrap();

            if slot[0] == DIR_END_OF_DIR {
                return Ok(());
            }

            let keep_going = f(&slot, SlotLocation { cluster: dir_cluster, index_in_dir: index });
            if !keep_going {
                return Ok(());
            }
            index += 1;
        }
    }

    /// Finds one entry in a directory by exact (case-insensitive) name
    /// match, checking the decoded long name first and falling back to the
    /// 8.3 alias.
    pub fn find_entry<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        dir_cluster: u32,
        name: &str,
    ) -> Result<Option<DirEntry>> {
        let mut found = None;
        let mut lfn_parts: [LongEntrySlot; 20] = [LongEntrySlot {
            ordinal: 0,
            is_last: false,
            checksum: 0,
            chars: [0; LFN_CHARS_PER_SLOT],
        }; 20];
        let mut lfn_count = 0usize;
        let mut lfn_start = None;

        self.for_each_slot(dev, dir_cluster, |slot, loc| {
            if slot[0] == DIR_FREE_SLOT {
                lfn_count = 0;
                lfn_start = None;
                return true;
            }

            if slot[0x0B] == attr::LFN {
                let parsed = LongEntrySlot::decode(slot);
                if lfn_start.is_none() {
                    lfn_start = Some(loc);
                }
                if lfn_count < lfn_parts.len() {
                    lfn_parts[lfn_count] = parsed;
                    lfn_count += 1;
                }
                return true;
            }

            let short = ShortEntry::decode(slot);
            let long_name = decode_lfn_chain(&lfn_parts[..lfn_count], short.lfn_checksum());
            let matches_name = long_name
                .as_ref()
                .map(|n| n.as_str().eq_ignore_ascii_case(name))
                .unwrap_or(false)
                || short_name_matches(&short, name);

            let this_first_slot = lfn_start.take().unwrap_or(loc);
            lfn_count = 0;

            if matches_name {
                found = Some(DirEntry { short, long_name, short_slot: loc, first_slot: this_first_slot });
                return false;
            }
            true
        })?;

        Ok(found)
    }

    /// Enumerates every live (non-deleted, non-volume-label) entry in a
    /// directory, invoking `f(DirEntry)`. `f` returns `true` to continue.
    pub fn list_entries<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        dir_cluster: u32,
        mut f: impl FnMut(&DirEntry) -> bool,
    ) -> Result<()> {
        let mut lfn_parts: [LongEntrySlot; 20] = [LongEntrySlot {
            ordinal: 0,
            is_last: false,
            checksum: 0,
            chars: [0; LFN_CHARS_PER_SLOT],
        }; 20];
        let mut lfn_count = 0usize;
        let mut lfn_start = None;
        let mut stop = false;

        self.for_each_slot(dev, dir_cluster, |slot, loc| {
            if slot[0] == DIR_FREE_SLOT {
                lfn_count = 0;
                lfn_start = None;
                return true;
            }

            if slot[0x0B] == attr::LFN {
                let parsed = LongEntrySlot::decode(slot);
                if lfn_start.is_none() {
                    lfn_start = Some(loc);
                }
                if lfn_count < lfn_parts.len() {
                    lfn_parts[lfn_count] = parsed;
                    lfn_count += 1;
                }
                return true;
            }

            let short = ShortEntry::decode(slot);
            let this_first_slot = lfn_start.take().unwrap_or(loc);
            let long_name = decode_lfn_chain(&lfn_parts[..lfn_count], short.lfn_checksum());
            lfn_count = 0;

            if !short.is_volume_label() {
                let entry = DirEntry { short, long_name, short_slot: loc, first_slot: this_first_slot };
                if !f(&entry) {
                    stop = true;
                    return false;
                }
            }
            !stop
        })
    }

    /// Finds `count` consecutive free (or end-of-directory) slots, growing
    /// the directory by one cluster if none are found and it isn't the
    /// fixed FAT12/16 root (which cannot grow: `DirEntryFull`).
    pub fn find_free_slots<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        dir_cluster: u32,
        count: u32,
    ) -> Result<SlotLocation> {
        let mut run_start = None;
        let mut run_len = 0u32;
        let mut last_index = 0u32;
        let mut hit_end = false;

        self.for_each_slot(dev, dir_cluster, |slot, loc| {
            last_index = loc.index_in_dir;
            if slot[0] == DIR_FREE_SLOT {
                if run_start.is_none() {
                    run_start = Some(loc);
                }
                run_len += 1;
                if run_len >= count {
                    return false;
                }
                true
            } else {
                run_start = None;
                run_len = 0;
                true
            }
        })?;

        if run_len >= count {
            return Ok(run_start.unwrap());
        }

        // Ran off the end without a free run large enough: the slot at
        // `last_index + 1` onward is virgin end-of-directory space within
        // the already-allocated region, or we need to grow the directory.
        let needed_from_end = count - run_len;
        let base = run_start.unwrap_or(SlotLocation { cluster: dir_cluster, index_in_dir: last_index + 1 });

        if self.root_aware_cluster(dir_cluster) == 0 {
            // Fixed-size root: verify the whole run fits without growing.
            let total_slots = self.root_dir_sectors * (self.bytes_per_sector as u32 / DIR_ENTRY_SIZE as u32);
            if base.index_in_dir + count > total_slots {
                return Err(Error::DirEntryFull);
            }
            return Ok(base);
        }

        let _ = (needed_from_end, hit_end);
        Ok(base)
    }

    /// Writes a short entry (and, if present, its LFN chain) starting at
    /// `at`, allocating a new cluster for the directory if the slots run
    /// past its current allocation.
    pub fn write_entry<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        dir_cluster: u32,
        at: SlotLocation,
        lfn_slots: &[LongEntrySlot],
        short: &ShortEntry,
    ) -> Result<()> {
        let total = lfn_slots.len() as u32 + 1;
        self.ensure_dir_capacity(dev, dir_cluster, at.index_in_dir + total)?;

        for (i, lfn) in lfn_slots.iter().enumerate() {
            let loc = SlotLocation { cluster: dir_cluster, index_in_dir: at.index_in_dir + i as u32 };
            let sector = self.slot_sector(dev, dir_cluster, loc.index_in_dir)?;
            let offset = self.locate_slot(dev, dir_cluster, loc.index_in_dir)?.ok_or(Error::InternalError)?;
            let mut buf = [0u8; DIR_ENTRY_SIZE];
            lfn.encode(&mut buf);
            self.scratch[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(&buf);
            self.write_back_slot(dev, sector)?;
        }

        let short_index = at.index_in_dir + lfn_slots.len() as u32;
        let sector = self.slot_sector(dev, dir_cluster, short_index)?;
        let offset = self.locate_slot(dev, dir_cluster, short_index)?.ok_or(Error::InternalError)?;
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        short.encode(&mut buf);
        self.scratch[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(&buf);
        self.write_back_slot(dev, sector)?;

        Ok(())
    }

    /// Marks the short entry (and its LFN chain, if any) as deleted by
    /// writing `0xE5` into every slot's first byte.
    pub fn erase_entry<D: BlockDevice>(&mut self, dev: &mut D, entry: &DirEntry) -> Result<()> {
        let mut index = entry.first_slot.index_in_dir;
        let dir_cluster = entry.first_slot.cluster;
        loop {
            let sector = self.slot_sector(dev, dir_cluster, index)?;
            let offset = self.locate_slot(dev, dir_cluster, index)?.ok_or(Error::InternalError)?;
            self.scratch[offset] = DIR_FREE_SLOT;
            self.write_back_slot(dev, sector)?;
            if index == entry.short_slot.index_in_dir {
                break;
            }
            index += 1;
        }
        Ok(())
    }

    /// Re-reads the sector holding `loc`'s short entry and, if the size or
    /// first-cluster fields differ from what the handle has cached,
    /// rewrites them in place. Used by `close` to flush deferred metadata.
    pub fn update_dir_entry_size<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        loc: SlotLocation,
        start_cluster: u32,
        file_size: u32,
    ) -> Result<()> {
        let sector = self.slot_sector(dev, loc.cluster, loc.index_in_dir)?;
        let offset = self.locate_slot(dev, loc.cluster, loc.index_in_dir)?.ok_or(Error::InternalError)?;

        let mut short = ShortEntry::decode(&self.scratch[offset..offset + DIR_ENTRY_SIZE]);
        if short.file_size == file_size && short.first_cluster == start_cluster {
            return Ok(());
        }

        short.file_size = file_size;
        short.first_cluster = start_cluster;
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        short.encode(&mut buf);
        self.scratch[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(&buf);
        self.write_back_slot(dev, sector)
    }

    /// Ensures the cluster-chain directory at `dir_cluster` has at least
    /// `needed_slots` slots allocated, growing it one cluster at a time.
    /// No-op (and never grows) for the fixed FAT12/16 root.
    fn ensure_dir_capacity<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        dir_cluster: u32,
        needed_slots: u32,
    ) -> Result<()> {
        let dir_cluster = self.root_aware_cluster(dir_cluster);
        if dir_cluster == 0 {
            let total_slots = self.root_dir_sectors * (self.bytes_per_sector as u32 / DIR_ENTRY_SIZE as u32);
            return if needed_slots > total_slots { Err(Error::DirEntryFull) } else { Ok(()) };
        }

        let slots_per_cluster = self.slots_per_cluster();
        let mut cluster = dir_cluster;
        let mut allocated_slots = slots_per_cluster;
        let mut last = cluster;

        while allocated_slots < needed_slots {
            let (next, is_eof) = self.next_cluster(dev, cluster)?;
            if is_eof {
                let new = self.grow_chain(dev, last)?;
                self.zero_new_cluster(dev, new)?;
                cluster = new;
            } else {
                cluster = next;
            }
            last = cluster;
            allocated_slots += slots_per_cluster;
        }

        Ok(())
    }

    pub fn zero_new_cluster<D: BlockDevice>(&mut self, dev: &mut D, cluster: u32) -> Result<()> {
        let zero = crate::block::Sector::default();
        let start = self.cluster_to_sector(cluster);
        for i in 0..self.sectors_per_cluster as u64 {
            if !dev.write(self.lun, zero.as_slice(), start + i, 1) {
                return Err(Error::DiskAccessError);
            }
        }
        Ok(())
    }

    /// Writes the `.` and `..` entries into slots 0 and 1 of a freshly
    /// zeroed directory cluster. `..` inherits `parent_dir_cluster` as its
    /// first cluster (0 if the parent is the root, even on FAT32).
    pub fn write_dot_entries<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        new_cluster: u32,
        parent_dir_cluster: u32,
        now: &DateTime,
    ) -> Result<()> {
        let (date, time) = pack(*now);
        let dot = ShortEntry {
            name: [b'.', b' ', b' ', b' ', b' ', b' ', b' ', b' '],
            ext: [b' '; 3],
            attr: attr::DIRECTORY,
            crt_time_tenth: 0,
            crt_time: time,
            crt_date: date,
            lst_acc_date: date,
            wrt_time: time,
            wrt_date: date,
            first_cluster: new_cluster,
            file_size: 0,
        };
        let mut dotdot = dot.clone();
        dotdot.name = [b'.', b'.', b' ', b' ', b' ', b' ', b' ', b' '];
        dotdot.first_cluster = parent_dir_cluster;

        for (index, entry) in [(0u32, &dot), (1u32, &dotdot)] {
            let sector = self.slot_sector(dev, new_cluster, index)?;
            let offset = self.locate_slot(dev, new_cluster, index)?.ok_or(Error::InternalError)?;
            let mut buf = [0u8; DIR_ENTRY_SIZE];
            entry.encode(&mut buf);
            self.scratch[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(&buf);
            self.write_back_slot(dev, sector)?;
        }
        Ok(())
    }

    /// Rewrites the timestamp fields of the short entry at `loc`. A `None`
    /// argument leaves the corresponding field untouched.
    pub fn set_entry_times<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        loc: SlotLocation,
        created: Option<DateTime>,
        accessed: Option<DateTime>,
        modified: Option<DateTime>,
    ) -> Result<()> {
        let sector = self.slot_sector(dev, loc.cluster, loc.index_in_dir)?;
        let offset = self.locate_slot(dev, loc.cluster, loc.index_in_dir)?.ok_or(Error::InternalError)?;
        let mut short = ShortEntry::decode(&self.scratch[offset..offset + DIR_ENTRY_SIZE]);

        if let Some(dt) = created {
            short.set_created(dt);
        }
        if let Some(dt) = accessed {
            let (date, _) = pack(dt);
            short.lst_acc_date = date;
        }
        if let Some(dt) = modified {
            short.set_modified(dt);
        }

        let mut buf = [0u8; DIR_ENTRY_SIZE];
        short.encode(&mut buf);
        self.scratch[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(&buf);
        self.write_back_slot(dev, sector)
    }

    /// Generates a `~NNNNNNN.ext` short name for a file whose real name
    /// needs an LFN, by scanning the directory for the highest numeric tail
    /// already in use among entries sharing the same extension.
    pub fn generate_short_name<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        dir_cluster: u32,
        leaf: &str,
    ) -> Result<([u8; 8], [u8; 3])> {
        let mut ext = [b' '; 3];
        if let Some(dot) = leaf.rfind('.') {
            for (i, b) in leaf[dot + 1..].bytes().take(3).enumerate() {
                ext[i] = b.to_ascii_uppercase();
            }
        }

        let mut max_id: u32 = 0;
        self.list_entries(dev, dir_cluster, |entry| {
            if entry.short.ext == ext {
                if let Some(id) = parse_tilde_id(&entry.short.name) {
                    if id > max_id {
                        max_id = id;
                    }
                }
            }
            true
        })?;

        let mut name = [b' '; 8];
        name[0] = b'~';
        write_decimal(max_id + 1, &mut name[1..8]);
        Ok((name, ext))
    }
}

/// Parses an existing short name's `~NNNNNNN` numeric tail, if it has one.
fn parse_tilde_id(name: &[u8; 8]) -> Option<u32> {
    if name[0] != b'~' {
        return None;
    }
    let mut value: u32 = 0;
    let mut any = false;
    for &b in &name[1..8] {
        if b == b' ' {
            break;
        }
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add((b - b'0') as u32)?;
        any = true;
    }
    if any {
        Some(value)
    } else {
        None
    }
}

/// Writes `value` in decimal into `dst`, left-justified; the rest of `dst`
/// (already space-padded by the caller) is left untouched.
fn write_decimal(mut value: u32, dst: &mut [u8]) {
    if value == 0 {
        dst[0] = b'0';
        return;
    }
    let mut tmp = [0u8; 10];
    let mut n = 0;
    while value > 0 {
        tmp[n] = b'0' + (value % 10) as u8;
        value /= 10;
        n += 1;
    }
    for i in 0..n.min(dst.len()) {
        dst[i] = tmp[n - 1 - i];
    }
}

fn short_name_matches(short: &ShortEntry, name: &str) -> bool {
    let mut combined = [b' '; 12];
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
    let candidate = core::str::from_utf8(&combined[..len]).unwrap_or("");
    candidate.eq_ignore_ascii_case(name)
}

/// Reassembles a name from an ordered run of LFN slots (as collected walking
/// forward through the directory, so `parts[0]` is the *first on disk*,
/// which is the *last* ordinal), verifying the checksum against the short
/// entry that follows. Returns `None` on any mismatch, in which case callers
/// fall back to the 8.3 alias.
fn decode_lfn_chain(parts: &[LongEntrySlot], expected_checksum: u8) -> Option<heapless_name::NameBuf> {
    if parts.is_empty() {
        return None;
    }

    // Sort logically by ordinal: highest ordinal (marked `is_last`) holds the
    // first characters of the name.
    let mut ordinals: [u8; 20] = [0; 20];
    for (i, p) in parts.iter().enumerate() {
        ordinals[i] = p.ordinal;
    }

    let mut buf = [0u16; LFN_MAX_CHARS];
    let mut total_chars = 0usize;

    for target_ordinal in (1..=parts.len()).rev() {
        let part = parts.iter().find(|p| p.ordinal as usize == target_ordinal)?;
        if part.checksum != expected_checksum {
            return None;
        }
        for &ch in part.chars.iter() {
            if ch == 0x0000 || ch == 0xFFFF {
                continue;
            }
            if total_chars >= buf.len() {
                return None;
            }
            buf[total_chars] = ch;
            total_chars += 1;
        }
    }

    let mut name = heapless_name::NameBuf::new();
    let mut utf8_buf = [0u8; 4];
    for &unit in &buf[..total_chars] {
        let ch = char::from_u32(unit as u32).unwrap_or('_');
        if !name.push_utf8(ch.encode_utf8(&mut utf8_buf)) {
            return None;
        }
    }
    Some(name)
}

/// Splits an LFN checksum chain into the ordered slots to write, most
/// significant (last) ordinal first, matching on-disk order.
pub fn build_lfn_slots(name: &str, checksum: u8) -> ([LongEntrySlot; 15], usize) {
    let mut units = [0u16; LFN_MAX_CHARS];
    let mut count = 0usize;
    for ch in name.encode_utf16() {
        if count >= units.len() {
            break;
        }
        units[count] = ch;
        count += 1;
    }

    let slot_count = (count + LFN_CHARS_PER_SLOT - 1) / LFN_CHARS_PER_SLOT.max(1);
    let slot_count = slot_count.max(1);
    let mut slots = [LongEntrySlot {
        ordinal: 0,
        is_last: false,
        checksum,
        chars: [0xFFFF; LFN_CHARS_PER_SLOT],
    }; 15];

    for slot_idx in 0..slot_count {
        let ordinal = (slot_idx + 1) as u8;
        let is_last = slot_idx == slot_count - 1;
        let mut chars = [0xFFFFu16; LFN_CHARS_PER_SLOT];
        for j in 0..LFN_CHARS_PER_SLOT {
            let char_idx = slot_idx * LFN_CHARS_PER_SLOT + j;
            if char_idx < count {
                chars[j] = units[char_idx];
            } else if char_idx == count {
                chars[j] = 0x0000;
            }
        }
        slots[slot_idx] = LongEntrySlot { ordinal, is_last, checksum, chars };
    }

    // Encode order on disk is highest ordinal first.
    let mut ordered = slots;
    for i in 0..slot_count {
        ordered[i] = slots[slot_count - 1 - i];
    }

    (ordered, slot_count)
}
