use serde::{Deserialize, Serialize};
use std::{
    fmt,
    io::{Read, Result as IoResult},
    num::{NonZeroU64, NonZeroUsize},
    ops::Deref,
};

/// 除最后一个分片外，每个分片的最小尺寸（5 MiB）
pub const MIN_CHUNK_SIZE: u64 = 5 << 20;

/// 单个分片的最大尺寸（5 GiB）
pub const MAX_CHUNK_SIZE: u64 = 5 << 30;

/// 单次分片上传的最大分片数
///
/// 当分片号达到该值时，数据源剩余的全部数据都会作为最后一个分片上传。
pub const MAX_CHUNKS: usize = 100;

/// 单个对象的最大尺寸（5 TiB）
pub const MAX_FILE_SIZE: u64 = 5 << 40;

/// 分片尺寸
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkSize(NonZeroU64);

impl ChunkSize {
    /// 创建分片尺寸，尺寸为 0 时返回 [`None`]
    #[inline]
    pub fn new(chunk_size: u64) -> Option<Self> {
        NonZeroU64::new(chunk_size).map(Self)
    }

    /// 获取 [`NonZeroU64`] 形式的分片尺寸
    #[inline]
    pub fn as_non_zero_u64(&self) -> NonZeroU64 {
        self.0
    }

    /// 获取 [`u64`] 形式的分片尺寸
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.as_non_zero_u64().get()
    }

    /// 实际使用的分片尺寸
    ///
    /// 小于 [`MIN_CHUNK_SIZE`] 的尺寸会被提升到 [`MIN_CHUNK_SIZE`]，但不会检查 [`MAX_CHUNK_SIZE`]。
    #[inline]
    pub fn effective(&self) -> Self {
        Self(self.0.max(Self::min().0))
    }

    /// 最小分片尺寸
    #[inline]
    pub fn min() -> Self {
        Self(NonZeroU64::MIN.saturating_add(MIN_CHUNK_SIZE - 1))
    }
}

impl Default for ChunkSize {
    #[inline]
    fn default() -> Self {
        Self(NonZeroU64::MIN.saturating_add((15 << 20) - 1))
    }
}

impl fmt::Debug for ChunkSize {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChunkSize").field(&self.0).finish()
    }
}

impl fmt::Display for ChunkSize {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<NonZeroU64> for ChunkSize {
    #[inline]
    fn from(size: NonZeroU64) -> Self {
        Self(size)
    }
}

impl From<ChunkSize> for NonZeroU64 {
    #[inline]
    fn from(size: ChunkSize) -> Self {
        size.as_non_zero_u64()
    }
}

impl From<ChunkSize> for u64 {
    #[inline]
    fn from(size: ChunkSize) -> Self {
        size.as_u64()
    }
}

impl Deref for ChunkSize {
    type Target = NonZeroU64;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// 从数据源中读出的一个分片
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    part_number: NonZeroUsize,
    data: Vec<u8>,
}

impl Chunk {
    /// 获取分片号，从 1 开始
    #[inline]
    pub fn part_number(&self) -> NonZeroUsize {
        self.part_number
    }

    /// 获取分片数据
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 获取分片长度
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 分片是否为空，由 [`ChunkReader`] 读出的分片总不为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 拆分出分片号与分片数据
    #[inline]
    pub fn into_parts(self) -> (NonZeroUsize, Vec<u8>) {
        (self.part_number, self.data)
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("part_number", &self.part_number)
            .field("len", &self.data.len())
            .finish()
    }
}

/// 分片读取器
///
/// 按顺序从数据源中读取分片，分片号从 1 开始递增。
/// 分片号达到 [`MAX_CHUNKS`] 时，读取数据源中剩余的全部数据作为最后一个分片。
/// 读到空数据即视为数据源结束，不会产生空分片。
#[derive(Debug)]
pub struct ChunkReader<R> {
    source: R,
    chunk_size: ChunkSize,
    next_part_number: NonZeroUsize,
    finished: bool,
}

impl<R: Read> ChunkReader<R> {
    /// 创建分片读取器，分片尺寸会被提升到不小于 [`MIN_CHUNK_SIZE`]
    #[inline]
    pub fn new(source: R, chunk_size: ChunkSize) -> Self {
        Self::new_with_exact_chunk_size(source, chunk_size.effective())
    }

    #[inline]
    pub(crate) fn new_with_exact_chunk_size(source: R, chunk_size: ChunkSize) -> Self {
        Self {
            source,
            chunk_size,
            next_part_number: NonZeroUsize::MIN,
            finished: false,
        }
    }

    /// 获取实际使用的分片尺寸
    #[inline]
    pub fn chunk_size(&self) -> ChunkSize {
        self.chunk_size
    }

    /// 获取已经读出的分片数量
    #[inline]
    pub fn chunks_read(&self) -> usize {
        self.next_part_number.get() - 1
    }

    /// 读取下一个分片，数据源结束时返回 [`None`]
    pub fn next_chunk(&mut self) -> IoResult<Option<Chunk>> {
        if self.finished {
            return Ok(None);
        }
        let part_number = self.next_part_number;
        let mut data = Vec::new();
        if part_number.get() == MAX_CHUNKS {
            self.source.read_to_end(&mut data)?;
        } else {
            self.source
                .by_ref()
                .take(self.chunk_size.as_u64())
                .read_to_end(&mut data)?;
        }
        if data.is_empty() {
            self.finished = true;
            return Ok(None);
        }
        self.next_part_number = part_number.saturating_add(1);
        Ok(Some(Chunk { part_number, data }))
    }

    /// 取回数据源
    #[inline]
    pub fn into_inner(self) -> R {
        self.source
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = IoResult<Chunk>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}
