use crate::error::{Result, TaxonomyError};
use crate::utils::dyn_reader;
use crossbeam_channel::bounded;
use scoped_threadpool::Pool;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// A wide pool for the large nodes file, a narrow one for the merged and
// deleted side files.
const NODES_THREADS: usize = 8;
const NODES_CHUNK_SIZE: usize = 100;
const AUX_THREADS: usize = 3;
const AUX_CHUNK_SIZE: usize = 50;

/// A batch of lines paired with their 1-based line numbers.
type Chunk = Vec<(usize, String)>;

fn check_columns(columns: &[usize]) -> Result<()> {
    if columns.iter().any(|&c| c < 1) {
        return Err(TaxonomyError::IllegalColumnIndex);
    }
    Ok(())
}

fn parse_taxid(token: &str, line_no: usize) -> Result<u32> {
    token.parse::<u32>().map_err(|_| TaxonomyError::Parse {
        line: line_no,
        token: token.to_string(),
    })
}

fn pair_record(
    line: &str,
    first_col: usize,
    second_col: usize,
    line_no: usize,
) -> Result<Option<(u32, u32)>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < first_col.max(second_col) {
        return Ok(None);
    }
    let first = parse_taxid(fields[first_col - 1], line_no)?;
    let second = parse_taxid(fields[second_col - 1], line_no)?;
    Ok(Some((first, second)))
}

/// Parses one nodes line into `(child, parent)`.
///
/// Returns `Ok(None)` for empty lines and lines with too few fields; a
/// selected field that is not a valid taxid fails the whole load.
pub fn node_record(
    line: &str,
    child_col: usize,
    parent_col: usize,
    line_no: usize,
) -> Result<Option<(u32, u32)>> {
    pair_record(line, child_col, parent_col, line_no)
}

/// Parses one nodes line into `(child, parent, rank)`.
pub fn node_record_with_rank(
    line: &str,
    child_col: usize,
    parent_col: usize,
    rank_col: usize,
    line_no: usize,
) -> Result<Option<(u32, u32, String)>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < child_col.max(parent_col).max(rank_col) {
        return Ok(None);
    }
    let child = parse_taxid(fields[child_col - 1], line_no)?;
    let parent = parse_taxid(fields[parent_col - 1], line_no)?;
    let rank = fields[rank_col - 1].to_string();
    Ok(Some((child, parent, rank)))
}

/// Parses one merged line into `(old, new)`.
pub fn merged_record(
    line: &str,
    old_col: usize,
    new_col: usize,
    line_no: usize,
) -> Result<Option<(u32, u32)>> {
    pair_record(line, old_col, new_col, line_no)
}

/// Parses one delnodes line into a deleted taxid.
pub fn deleted_record(line: &str, col: usize, line_no: usize) -> Result<Option<u32>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < col {
        return Ok(None);
    }
    parse_taxid(fields[col - 1], line_no).map(Some)
}

/// Streams a dump file through a bounded producer/worker pipeline.
///
/// One thread reads lines and batches them into chunks, `n_threads - 2`
/// workers turn chunks into records via `work`, and the caller's `sink`
/// consumes records on a single thread. Chunks complete in unspecified
/// order. The first error (I/O, parse, or sink) raises a stop flag:
/// remaining chunks are drained and dropped so the bounded channels never
/// back up against a dead consumer.
pub(crate) fn read_chunked<P, T, W, S>(
    path: P,
    n_threads: usize,
    chunk_size: usize,
    work: W,
    mut sink: S,
) -> Result<()>
where
    P: AsRef<Path>,
    T: Send,
    W: Fn(Chunk) -> Result<Vec<T>> + Send + Sync,
    S: FnMut(T) -> Result<()> + Send,
{
    assert!(n_threads > 2);
    let reader = BufReader::new(dyn_reader(&path)?);
    let buffer_len = n_threads + 2;
    let (chunk_send, chunk_recv) = bounded::<std::io::Result<Chunk>>(buffer_len);
    let (done_send, done_recv) = bounded::<Result<Vec<T>>>(buffer_len);
    let chunk_recv = Arc::new(chunk_recv);
    let done_send = Arc::new(done_send);
    let stop = Arc::new(AtomicBool::new(false));
    let mut pool = Pool::new(n_threads as u32);

    let mut first_err: Option<TaxonomyError> = None;

    pool.scoped(|scope| {
        {
            let stop = Arc::clone(&stop);
            scope.execute(move || {
                let mut lines = reader.lines().enumerate();
                'produce: while !stop.load(Ordering::Relaxed) {
                    let mut chunk: Chunk = Vec::with_capacity(chunk_size);
                    while chunk.len() < chunk_size {
                        match lines.next() {
                            Some((idx, Ok(line))) => chunk.push((idx + 1, line)),
                            Some((_, Err(e))) => {
                                let _ = chunk_send.send(Err(e));
                                break 'produce;
                            }
                            None => break,
                        }
                    }
                    if chunk.is_empty() || chunk_send.send(Ok(chunk)).is_err() {
                        break;
                    }
                }
            });
        }

        for _ in 0..n_threads - 2 {
            let chunk_recv = Arc::clone(&chunk_recv);
            let done_send = Arc::clone(&done_send);
            let stop = Arc::clone(&stop);
            let work = &work;
            scope.execute(move || {
                while let Ok(chunk) = chunk_recv.recv() {
                    if stop.load(Ordering::Relaxed) {
                        continue;
                    }
                    let parsed = match chunk {
                        Ok(chunk) => work(chunk),
                        Err(e) => Err(e.into()),
                    };
                    if parsed.is_err() {
                        stop.store(true, Ordering::Relaxed);
                    }
                    if done_send.send(parsed).is_err() {
                        break;
                    }
                }
            });
        }
        // Release this scope's handle so the channel closes with the workers.
        drop(done_send);

        {
            let stop = Arc::clone(&stop);
            let first_err = &mut first_err;
            scope.execute(move || {
                while let Ok(parsed) = done_recv.recv() {
                    if first_err.is_some() {
                        continue;
                    }
                    match parsed {
                        Ok(records) => {
                            for record in records {
                                if let Err(e) = sink(record) {
                                    *first_err = Some(e);
                                    stop.store(true, Ordering::Relaxed);
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            *first_err = Some(e);
                        }
                    }
                }
            });
        }

        scope.join_all();
    });

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Streams `(child, parent)` records from a nodes dump file into `sink`.
///
/// `child_col` and `parent_col` are 1-based tab-separated column indices.
/// Record order is not guaranteed; callers must fold records
/// order-independently.
pub fn parse_nodes<P, S>(path: P, child_col: usize, parent_col: usize, sink: S) -> Result<()>
where
    P: AsRef<Path>,
    S: FnMut((u32, u32)) -> Result<()> + Send,
{
    check_columns(&[child_col, parent_col])?;
    read_chunked(
        path,
        NODES_THREADS,
        NODES_CHUNK_SIZE,
        move |chunk| {
            let mut records = Vec::with_capacity(chunk.len());
            for (line_no, line) in chunk {
                if let Some(record) = node_record(&line, child_col, parent_col, line_no)? {
                    records.push(record);
                }
            }
            Ok(records)
        },
        sink,
    )
}

/// Streams `(child, parent, rank)` records from a nodes dump file into `sink`.
pub fn parse_nodes_with_rank<P, S>(
    path: P,
    child_col: usize,
    parent_col: usize,
    rank_col: usize,
    sink: S,
) -> Result<()>
where
    P: AsRef<Path>,
    S: FnMut((u32, u32, String)) -> Result<()> + Send,
{
    check_columns(&[child_col, parent_col, rank_col])?;
    read_chunked(
        path,
        NODES_THREADS,
        NODES_CHUNK_SIZE,
        move |chunk| {
            let mut records = Vec::with_capacity(chunk.len());
            for (line_no, line) in chunk {
                if let Some(record) =
                    node_record_with_rank(&line, child_col, parent_col, rank_col, line_no)?
                {
                    records.push(record);
                }
            }
            Ok(records)
        },
        sink,
    )
}

/// Streams `(old, new)` records from a merged dump file into `sink`.
pub fn parse_merged<P, S>(path: P, old_col: usize, new_col: usize, sink: S) -> Result<()>
where
    P: AsRef<Path>,
    S: FnMut((u32, u32)) -> Result<()> + Send,
{
    check_columns(&[old_col, new_col])?;
    read_chunked(
        path,
        AUX_THREADS,
        AUX_CHUNK_SIZE,
        move |chunk| {
            let mut records = Vec::with_capacity(chunk.len());
            for (line_no, line) in chunk {
                if let Some(record) = merged_record(&line, old_col, new_col, line_no)? {
                    records.push(record);
                }
            }
            Ok(records)
        },
        sink,
    )
}

/// Streams deleted taxids from a delnodes dump file into `sink`.
pub fn parse_deleted<P, S>(path: P, col: usize, sink: S) -> Result<()>
where
    P: AsRef<Path>,
    S: FnMut(u32) -> Result<()> + Send,
{
    check_columns(&[col])?;
    read_chunked(
        path,
        AUX_THREADS,
        AUX_CHUNK_SIZE,
        move |chunk| {
            let mut records = Vec::with_capacity(chunk.len());
            for (line_no, line) in chunk {
                if let Some(record) = deleted_record(&line, col, line_no)? {
                    records.push(record);
                }
            }
            Ok(records)
        },
        sink,
    )
}
