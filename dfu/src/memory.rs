use std::sync::LazyLock;

use nonempty::NonEmpty;
use regex::Regex;

use crate::DfuError;

const MEM_READABLE: u8 = 1;
const MEM_ERASABLE: u8 = 2;
const MEM_WRITABLE: u8 = 4;

static LAYOUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@?\s*([^/]*?)\s*((?:/0x[\da-fA-F]+U?/[^/]*)+)$").unwrap()
});
static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/0x([\da-fA-F]+)U?/([^/]*)").unwrap()
});
static SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s*\*\s*(\d+)([KMB ]?)([a-g])").unwrap()
});

/// DfuSe memory map of one alternate setting
///
/// Segments are ordered by start address and never overlap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DfuMemory {
    name: String,
    segments: NonEmpty<DfuMemSegment>,
}

/// Address range with uniform page size, `end_addr` is inclusive
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DfuMemSegment {
    start_addr: u32,
    end_addr: u32,
    page_size: u32,
    mem_type: u8,
}

impl DfuMemory {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn segments(&self) -> &NonEmpty<DfuMemSegment> {
        &self.segments
    }

    /// Segment containing `addr`
    pub fn find_segment(&self, addr: u32) -> Option<&DfuMemSegment> {
        self.segments.iter().find(|s| s.contains(addr))
    }

    /// Segments intersecting `start_address..=end_address`
    pub fn find_segments(
        &self,
        start_address: u32,
        end_address: u32,
    ) -> Vec<DfuMemSegment> {
        self.segments
            .iter()
            .filter(|s| s.intersects(start_address, end_address))
            .cloned()
            .collect()
    }

    /// `start_address..=end_address` is fully covered by segments
    pub fn covers(&self, start_address: u32, end_address: u32) -> bool {
        let mut next = start_address as u64;
        for s in self.find_segments(start_address, end_address) {
            if (s.start_addr as u64) > next {
                return false;
            }
            next = s.end_addr as u64 + 1;
        }
        next > end_address as u64
    }

    pub fn start_addr(&self) -> u32 {
        self.segments.head.start_addr
    }
}

impl DfuMemSegment {
    /// `page_size` must not be 0 and `end_addr` not below `start_addr`
    pub(crate) fn new(
        start_addr: u32,
        end_addr: u32,
        page_size: u32,
        mem_type: u8,
    ) -> Self {
        DfuMemSegment {
            start_addr,
            end_addr,
            page_size,
            mem_type: mem_type & 7,
        }
    }

    pub fn start_addr(&self) -> u32 {
        self.start_addr
    }
    pub fn end_addr(&self) -> u32 {
        self.end_addr
    }
    pub fn page_size(&self) -> u32 {
        self.page_size
    }
    pub fn pages(&self) -> u32 {
        (self.end_addr - self.start_addr) / self.page_size + 1
    }
    pub fn size(&self) -> u64 {
        (self.end_addr - self.start_addr) as u64 + 1
    }
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start_addr && addr <= self.end_addr
    }
    pub fn intersects(&self, start_addr: u32, end_addr: u32) -> bool {
        start_addr <= self.end_addr && self.start_addr <= end_addr
    }
    /// Start of the page holding `addr`
    pub fn page_base(&self, addr: u32) -> u32 {
        addr & !(self.page_size - 1)
    }
    pub fn readable(&self) -> bool {
        self.mem_type & MEM_READABLE != 0
    }
    pub fn erasable(&self) -> bool {
        self.mem_type & MEM_ERASABLE != 0
    }
    pub fn writable(&self) -> bool {
        self.mem_type & MEM_WRITABLE != 0
    }

    /// Flags in `dfu-util` notation, ex: "rew"
    pub fn flags(&self) -> String {
        [
            (self.readable(), 'r'),
            (self.erasable(), 'e'),
            (self.writable(), 'w'),
        ]
        .iter()
        .map(|(set, c)| if *set { *c } else { '-' })
        .collect()
    }
}

fn invalid(layout: &str, reason: &str) -> DfuError {
    DfuError::InvalidMemoryLayout(format!("{reason}: \"{layout}\""))
}

/// Parse a DfuSe memory layout string
///
/// Format: `@<name>/0x<addr>/<n>*<size><mult><type>[,...][/0x<addr>/...]`
/// where `mult` is one of `' '`, `B`, `K` or `M` and the type letter
/// `a`..`g` encodes the readable (1), erasable (2) and writable (4) bits.
pub fn parse_memory_layout(mem_layout_str: &str) -> Result<DfuMemory, DfuError> {
    let layout_str = mem_layout_str.trim_end_matches(['\0', ' ']);
    let captures = LAYOUT_RE
        .captures(layout_str)
        .ok_or_else(|| invalid(layout_str, "not a memory layout"))?;

    let name = String::from(&captures[1]);
    let mut layout = Vec::new();

    for block in BLOCK_RE.captures_iter(&captures[2]) {
        let mut current_addr = u64::from_str_radix(&block[1], 16)
            .map_err(|_| invalid(layout_str, "bad address"))?;

        for seg_match in SEGMENT_RE.captures_iter(&block[2]) {
            let pages: u64 = seg_match[1]
                .parse()
                .map_err(|_| invalid(layout_str, "bad page count"))?;
            let mut page_size: u64 = seg_match[2]
                .parse()
                .map_err(|_| invalid(layout_str, "bad page size"))?;

            let too_large = || invalid(layout_str, "segment exceeds 4 GiB");
            page_size = match &seg_match[3] {
                "K" => page_size.checked_mul(1024),
                "M" => page_size.checked_mul(1024 * 1024),
                _ => Some(page_size),
            }
            .ok_or_else(too_large)?;
            if pages == 0 || page_size == 0 {
                return Err(invalid(layout_str, "empty segment"));
            }
            if page_size > u32::MAX as u64 {
                return Err(too_large());
            }

            let mem_type = seg_match[4].as_bytes()[0] & 7;
            let end_addr = pages
                .checked_mul(page_size)
                .and_then(|size| current_addr.checked_add(size - 1))
                .filter(|end| *end <= u32::MAX as u64)
                .ok_or_else(too_large)?;

            layout.push(DfuMemSegment::new(
                current_addr as u32,
                end_addr as u32,
                page_size as u32,
                mem_type,
            ));
            current_addr = end_addr + 1;
        }
    }

    layout.sort_by_key(|s| s.start_addr);
    if layout.windows(2).any(|w| w[0].end_addr >= w[1].start_addr) {
        return Err(invalid(layout_str, "overlapping segments"));
    }

    NonEmpty::from_vec(layout)
        .map(|segments| DfuMemory { name, segments })
        .ok_or_else(|| invalid(layout_str, "no segments"))
}
