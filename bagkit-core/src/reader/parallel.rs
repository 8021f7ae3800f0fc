//! Time-ordered reads with parallel chunk decompression
//!
//! The calling thread reads raw chunk records from the source and hands
//! them to a pool of scoped workers over a bounded channel. Workers
//! decompress and decode; results are merged by timestamp at the end.

use super::messages::{connection_for, in_chunk, plan_chunks, view_at, ChunkPlan, MessageView};
use super::{BagReader, Query};
use crate::chunk::decompress_chunk;
use crate::codec::ChunkRecord;
use crate::registry::ConnectionRegistry;
use crate::Result;
use crossbeam_channel::{bounded, unbounded};
use std::io::{Read, Seek};
use std::thread;
use tracing::debug;

struct Job {
    ordinal: usize,
    chunk: ChunkRecord,
    plan: ChunkPlan,
}

fn decode_job(job: &Job, registry: &ConnectionRegistry) -> Result<Vec<MessageView>> {
    let pos = job.plan.pos;
    let data = decompress_chunk(&job.chunk, pos)?;
    job.plan
        .entries
        .iter()
        .map(|(conn, entry)| {
            connection_for(registry, *conn)
                .and_then(|c| view_at(c, pos, &data, entry))
                .map_err(|e| in_chunk(pos, e))
        })
        .collect()
}

pub(super) fn read_ordered<R: Read + Seek>(
    reader: &BagReader<R>,
    query: &Query,
) -> Result<Vec<MessageView>> {
    let connections = query.select(reader.connections());
    let plans = plan_chunks(&reader.index, &connections, query.time_range());
    if plans.is_empty() {
        return Ok(Vec::new());
    }

    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(plans.len());
    debug!(chunks = plans.len(), workers, "Reading chunks in parallel");

    let registry = &reader.registry;
    let (job_tx, job_rx) = bounded::<Job>(workers * 2);
    let (result_tx, result_rx) = unbounded();

    let loaded: Result<()> = thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for job in job_rx {
                    let decoded = decode_job(&job, registry);
                    if result_tx.send((job.ordinal, decoded)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut loaded = Ok(());
        for (ordinal, plan) in plans.into_iter().enumerate() {
            match reader.load_chunk(plan.pos) {
                Ok(chunk) => {
                    if job_tx.send(Job { ordinal, chunk, plan }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    loaded = Err(e);
                    break;
                }
            }
        }
        drop(job_tx);
        loaded
    });
    loaded?;

    let mut decoded: Vec<(usize, Result<Vec<MessageView>>)> = result_rx.iter().collect();
    decoded.sort_by_key(|(ordinal, _)| *ordinal);

    let mut messages = Vec::new();
    for (_, chunk) in decoded {
        messages.extend(chunk?);
    }
    // Stable: equal timestamps keep chunk append order, then write order
    messages.sort_by_key(|m| m.timestamp());
    Ok(messages)
}
