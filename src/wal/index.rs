//! Page index
//!
//! Maps page numbers to the frames holding their versions, and records where
//! each transaction committed. Rebuilt from the log on open.

use std::collections::BTreeMap;

use super::{FrameNo, PageNo};

/// In-memory index over the frames of one log
///
/// ## Invariants
/// - Each per-page frame list is strictly ascending
/// - `commits` is strictly ascending by frame number
/// - Every frame number is `<= max_frame`
#[derive(Debug, Default, Clone)]
pub struct PageIndex {
    /// page → frames holding a version of it, oldest first
    pages: BTreeMap<PageNo, Vec<FrameNo>>,
    /// (commit frame, database size in pages), oldest first
    commits: Vec<(FrameNo, u32)>,
    /// Page held by each frame; entry `n - 1` belongs to frame `n`
    frames: Vec<PageNo>,
}

impl PageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `frame_no` holds a version of `page_no`
    ///
    /// Frames must be inserted in ascending order.
    pub fn insert(&mut self, page_no: PageNo, frame_no: FrameNo) {
        debug_assert_eq!(frame_no, self.max_frame() + 1, "frames must be indexed in order");
        self.pages.entry(page_no).or_default().push(frame_no);
        self.frames.push(page_no);
    }

    /// Record a commit boundary at `frame_no`
    pub fn record_commit(&mut self, frame_no: FrameNo, db_size: u32) {
        debug_assert!(frame_no <= self.max_frame());
        self.commits.push((frame_no, db_size));
    }

    /// Newest frame for `page_no` with number `<= upto`, O(log n)
    pub fn find(&self, page_no: PageNo, upto: FrameNo) -> Option<FrameNo> {
        let frames = self.pages.get(&page_no)?;
        let visible = frames.partition_point(|&f| f <= upto);
        if visible == 0 {
            None
        } else {
            Some(frames[visible - 1])
        }
    }

    /// Database size recorded by the newest commit `<= upto` (0 if none)
    pub fn db_size(&self, upto: FrameNo) -> u32 {
        let visible = self.commits.partition_point(|&(f, _)| f <= upto);
        if visible == 0 {
            0
        } else {
            self.commits[visible - 1].1
        }
    }

    /// Frame number of the newest commit, 0 if nothing is committed
    pub fn last_commit(&self) -> FrameNo {
        self.commits.last().map(|&(f, _)| f).unwrap_or(0)
    }

    /// Whether `frame_no` is a commit boundary
    pub fn is_commit(&self, frame_no: FrameNo) -> bool {
        self.commits
            .binary_search_by_key(&frame_no, |&(f, _)| f)
            .is_ok()
    }

    /// Highest indexed frame
    pub fn max_frame(&self) -> FrameNo {
        self.frames.len() as FrameNo
    }

    /// Page held by `frame_no`, if the frame is indexed
    pub fn page_of(&self, frame_no: FrameNo) -> Option<PageNo> {
        let slot = usize::try_from(frame_no.checked_sub(1)?).ok()?;
        self.frames.get(slot).copied()
    }

    /// Number of distinct pages with at least one frame
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Forget every frame after `frame_no`
    pub fn truncate_after(&mut self, frame_no: FrameNo) {
        if frame_no >= self.max_frame() {
            return;
        }
        self.pages.retain(|_, frames| {
            let keep = frames.partition_point(|&f| f <= frame_no);
            frames.truncate(keep);
            !frames.is_empty()
        });
        let keep = self.commits.partition_point(|&(f, _)| f <= frame_no);
        self.commits.truncate(keep);
        self.frames.truncate(frame_no as usize);
    }

    /// Pages to backfill for frames in `(after, upto]`
    ///
    /// Returns `(page, newest frame <= upto)` in ascending page order, one
    /// entry per page whose newest visible version is newer than `after`.
    pub fn backfill_plan(&self, after: FrameNo, upto: FrameNo) -> Vec<(PageNo, FrameNo)> {
        self.pages
            .keys()
            .filter_map(|&page_no| {
                let frame_no = self.find(page_no, upto)?;
                (frame_no > after).then_some((page_no, frame_no))
            })
            .collect()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.pages.clear();
        self.commits.clear();
        self.frames.clear();
    }

    /// Approximate heap bytes held by the index
    pub fn heap_bytes(&self) -> usize {
        let frames: usize = self
            .pages
            .values()
            .map(|v| v.capacity() * std::mem::size_of::<FrameNo>())
            .sum();
        let nodes = self.pages.len()
            * (std::mem::size_of::<PageNo>() + std::mem::size_of::<Vec<FrameNo>>());
        let commits = self.commits.capacity() * std::mem::size_of::<(FrameNo, u32)>();
        let owners = self.frames.capacity() * std::mem::size_of::<PageNo>();
        frames + nodes + commits + owners
    }
}
