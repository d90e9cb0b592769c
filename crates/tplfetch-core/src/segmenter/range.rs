/// A byte range [start, end) (half-open).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Start offset (inclusive).
    pub start: u64,
    /// End offset (exclusive).
    pub end: u64,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Range from `start + skip` to the end of this chunk. Used to resume a
    /// chunk that was partly received before a retry.
    pub fn remainder(&self, skip: u64) -> Chunk {
        Chunk {
            start: self.start.saturating_add(skip).min(self.end),
            end: self.end,
        }
    }

    /// Value for curl's `range` option (inclusive end): `start-(end-1)`.
    pub fn curl_range(&self) -> String {
        format!("{}-{}", self.start, self.end.saturating_sub(1))
    }

    /// HTTP Range header value: `bytes=start-(end-1)`.
    pub fn range_header_value(&self) -> String {
        format!("bytes={}", self.curl_range())
    }
}

/// Chunks covering [offset, total), produced lazily so the reported size
/// never decides how much memory the plan takes. The last chunk may be
/// shorter. Empty when there is nothing left to fetch. A zero `chunk_size`
/// yields a single chunk.
pub fn plan_chunks(offset: u64, total: u64, chunk_size: u64) -> Chunks {
    let step = if chunk_size == 0 {
        total.saturating_sub(offset)
    } else {
        chunk_size
    };
    Chunks {
        next: offset,
        total,
        step,
    }
}

/// Iterator returned by [`plan_chunks`].
#[derive(Debug, Clone)]
pub struct Chunks {
    next: u64,
    total: u64,
    step: u64,
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.next >= self.total {
            return None;
        }
        let start = self.next;
        let end = start.saturating_add(self.step).min(self.total);
        self.next = end;
        Some(Chunk { start, end })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total.saturating_sub(self.next);
        if left == 0 || self.step == 0 {
            return (0, Some(0));
        }
        match usize::try_from(left.div_ceil(self.step)) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}
