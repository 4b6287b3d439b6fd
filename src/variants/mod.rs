//! The three dispatch strategies (§4.5–§4.7), unified behind one
//! [`Dispatch`] enum so [`crate::pool::PoolInner`] doesn't need to know
//! which variant it's running.

mod v1_global;
mod v2_private;
mod v3_stealing;

use std::sync::Arc;

use crate::config::Variant;
use crate::pool::PoolInner;
use crate::work_item::WorkItem;

/// Per-variant state, owned by the pool for its whole lifetime.
pub(crate) enum Dispatch {
    Global(Arc<v1_global::State>),
    Private(Arc<v2_private::State>),
    Stealing(Arc<v3_stealing::State>),
}

pub(crate) fn build(variant: &Variant) -> Dispatch {
    match variant {
        Variant::Global => Dispatch::Global(Arc::new(v1_global::State::new())),
        Variant::PrivateQueues { selection, queue_capacity } => {
            Dispatch::Private(Arc::new(v2_private::State::new(*selection, *queue_capacity)))
        }
        Variant::WorkStealing => Dispatch::Stealing(Arc::new(v3_stealing::State::new())),
    }
}

/// Spawns one worker against whichever variant the pool is running.
/// `permanent` workers are created up front to satisfy `min_threads` and
/// never idle-exit; all later workers are grown on demand.
pub(crate) fn spawn_worker(pool: &Arc<PoolInner>, permanent: bool) {
    match &pool.dispatch {
        Dispatch::Global(state) => v1_global::spawn_worker(pool, state, permanent),
        Dispatch::Private(state) => v2_private::spawn_worker(pool, state, permanent),
        Dispatch::Stealing(state) => v3_stealing::spawn_worker(pool, state, permanent),
    }
}

/// Routes a freshly submitted item to whichever variant the pool is
/// running. Returns `false` if the pool was cancelled in the meantime.
pub(crate) fn submit(pool: &Arc<PoolInner>, item: WorkItem) -> bool {
    match &pool.dispatch {
        Dispatch::Global(state) => v1_global::submit(pool, state, item),
        Dispatch::Private(state) => v2_private::submit(pool, state, item),
        Dispatch::Stealing(state) => v3_stealing::submit(pool, state, item),
    }
}
