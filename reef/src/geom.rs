use std::cmp;

/// Make sure bounds are ordered correctly, eg end comes after start, bottom is below top.
///
pub(crate) fn rearrange<N>(lower: N, upper: N) -> (N, N)
where
    N: PartialOrd,
{
    if lower > upper {
        (upper, lower)
    } else {
        (lower, upper)
    }
}

/// An index window over a time/latitude/longitude array, half open on every axis.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cube {
    pub start: usize,
    pub end: usize,
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
    _private: (),
}

impl Cube {
    pub fn new(
        start: usize,
        end: usize,
        top: usize,
        bottom: usize,
        left: usize,
        right: usize,
    ) -> Self {
        let (start, end) = rearrange(start, end);
        let (top, bottom) = rearrange(top, bottom);
        let (left, right) = rearrange(left, right);
        Self {
            start,
            end,
            top,
            bottom,
            left,
            right,
            _private: (),
        }
    }

    pub fn instants(&self) -> usize {
        self.end - self.start
    }

    pub fn rows(&self) -> usize {
        self.bottom - self.top
    }

    pub fn cols(&self) -> usize {
        self.right - self.left
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.instants(), self.rows(), self.cols()]
    }

    /// Translate a window given relative to this cube into absolute coordinates.
    ///
    pub(crate) fn nested(&self, inner: Cube) -> Cube {
        Cube::new(
            self.start + inner.start,
            self.start + inner.end,
            self.top + inner.top,
            self.top + inner.bottom,
            self.left + inner.left,
            self.left + inner.right,
        )
    }

    /// Decompose this cube into subcubes that each lie within a single cell of a chunk grid
    /// anchored at the array origin.
    ///
    pub(crate) fn chunked(&self, chunks: [usize; 3]) -> ChunkIter {
        ChunkIter {
            cube: *self,
            chunks,
            instant: self.start,
            row: self.top,
            col: self.left,
        }
    }
}

pub(crate) struct ChunkIter {
    cube: Cube,
    chunks: [usize; 3],
    instant: usize,
    row: usize,
    col: usize,
}

impl Iterator for ChunkIter {
    type Item = Cube;

    fn next(&mut self) -> Option<Self::Item> {
        // a degenerate window or chunk grid holds no cells and yields no pieces
        if self.chunks.contains(&0) || self.cube.shape().contains(&0) {
            return None;
        }
        if self.instant >= self.cube.end {
            return None;
        }

        let boundary = |position: usize, chunk: usize| (position / chunk + 1) * chunk;
        let end = cmp::min(self.cube.end, boundary(self.instant, self.chunks[0]));
        let bottom = cmp::min(self.cube.bottom, boundary(self.row, self.chunks[1]));
        let right = cmp::min(self.cube.right, boundary(self.col, self.chunks[2]));
        let piece = Cube::new(self.instant, end, self.row, bottom, self.col, right);

        self.col = right;
        if self.col >= self.cube.right {
            self.col = self.cube.left;
            self.row = bottom;
            if self.row >= self.cube.bottom {
                self.row = self.cube.top;
                self.instant = end;
            }
        }

        Some(piece)
    }
}
