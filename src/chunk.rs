//! 파일 청크 분할
//!
//! - FileChunker: 파일을 고정 크기 청크로 순차 분할 (단방향, 1회성)
//! - Chunk: 인덱스와 총 개수가 붙은 데이터 조각

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};

use crate::{Error, Result};

/// 청크 (DATA 패킷 단위)
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 0부터 시작하는 인덱스
    pub index: u32,

    /// 파일 전체 청크 수
    pub total_chunks: u32,

    /// 실제 데이터
    pub data: Bytes,
}

/// 파일 청크 분할기
///
/// 파일 핸들은 반복이 끝나거나 분할기가 drop될 때 닫힌다.
/// 다시 순회하려면 파일을 새로 열어야 한다.
pub struct FileChunker {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    chunk_size: usize,
    file_size: u64,
    total_chunks: u32,
    next_index: u32,
}

impl FileChunker {
    /// 파일 열기
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk_size는 0보다 커야 함".into()));
        }

        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_size = file.metadata()?.len();
        let total_chunks = u32::try_from(file_size.div_ceil(chunk_size as u64)).map_err(|_| {
            Error::Config(format!(
                "청크 수가 너무 많음: file_size={}, chunk_size={}",
                file_size, chunk_size
            ))
        })?;

        Ok(Self {
            path,
            reader: Some(BufReader::with_capacity(chunk_size, file)),
            chunk_size,
            file_size,
            total_chunks,
            next_index: 0,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// 인덱스별 청크 길이 (마지막 청크만 짧을 수 있음)
    pub fn chunk_len(&self, index: u32) -> usize {
        let offset = index as u64 * self.chunk_size as u64;
        (self.file_size.saturating_sub(offset)).min(self.chunk_size as u64) as usize
    }

    fn read_next(&mut self) -> Result<Chunk> {
        let index = self.next_index;
        let len = self.chunk_len(index);

        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::Io(std::io::ErrorKind::BrokenPipe.into()))?;

        let mut buf = BytesMut::zeroed(len);
        reader.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("청크 {} 읽는 중 파일 끝: {}", index, self.path.display()),
                ))
            } else {
                Error::Io(e)
            }
        })?;

        self.next_index += 1;
        Ok(Chunk {
            index,
            total_chunks: self.total_chunks,
            data: buf.freeze(),
        })
    }
}

impl Iterator for FileChunker {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.total_chunks {
            // 끝까지 읽었으면 즉시 핸들 반환
            self.reader = None;
            return None;
        }

        match self.read_next() {
            Ok(chunk) => Some(Ok(chunk)),
            Err(e) => {
                self.reader = None;
                self.next_index = self.total_chunks;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total_chunks - self.next_index) as usize;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, data: &[u8]) -> PathBuf {
        let path = dir.path().join("input.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(data).unwrap();
        path
    }

    #[test]
    fn test_ten_bytes_chunk_four() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..10).collect();
        let path = write_file(&dir, &data);

        let chunker = FileChunker::open(&path, 4).unwrap();
        assert_eq!(chunker.total_chunks(), 3);
        assert_eq!(chunker.file_size(), 10);

        let chunks: Vec<Chunk> = chunker.map(|c| c.unwrap()).collect();
        let lens: Vec<usize> = chunks.iter().map(|c| c.data.len()).collect();
        assert_eq!(lens, vec![4, 4, 2]);
        assert!(chunks.iter().all(|c| c.total_chunks == 3));
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.data.to_vec()).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn test_chunk_lengths_sum_to_file_size() {
        let dir = tempfile::tempdir().unwrap();
        for (size, chunk_size) in [(1usize, 1usize), (1000, 7), (4096, 1024), (4097, 1024)] {
            let data = vec![0x5Au8; size];
            let path = write_file(&dir, &data);
            let chunker = FileChunker::open(&path, chunk_size).unwrap();
            let total = chunker.total_chunks() as usize;
            assert_eq!(total, size.div_ceil(chunk_size));

            let chunks: Vec<Chunk> = chunker.map(|c| c.unwrap()).collect();
            assert_eq!(chunks.len(), total);
            assert_eq!(chunks.iter().map(|c| c.data.len()).sum::<usize>(), size);
            for chunk in &chunks[..total - 1] {
                assert_eq!(chunk.data.len(), chunk_size);
            }
            assert_eq!(
                chunks[total - 1].data.len(),
                size - (total - 1) * chunk_size
            );
        }
    }

    #[test]
    fn test_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, &[]);
        let mut chunker = FileChunker::open(&path, 8).unwrap();
        assert_eq!(chunker.total_chunks(), 0);
        assert!(chunker.next().is_none());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileChunker::open(dir.path().join("nope"), 8);
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
