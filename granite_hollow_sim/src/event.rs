// Outbound notifications — what the outside world learns each tick.
//
// The core never calls back into rendering, audio, or GUI code. Instead,
// every observable state change is appended to a notification list threaded
// through the tick, and `SimState::tick` returns the drained list once all
// mutation is done. Consumers (mesh refresh, counters, sound cues) read it
// after the fact; the sim never blocks on them and never re-enters itself
// through a subscriber.
//
// Notifications double as the structured log of a run: the sequence of
// `Notification` values for a given seed and command script is itself
// deterministic.
//
// See also: `sim.rs` which emits these, `command.rs` for the inbound half.

use crate::fulfiller::{Tool, Training};
use crate::material::MaterialKind;
use crate::surface::SurfaceType;
use crate::types::{FulfillerId, GridCoord, JobId, MaterialId};
use serde::{Deserialize, Serialize};

/// A discrete, fire-and-forget notification emitted during a tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub tick: u64,
    pub kind: NotificationKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NotificationKind {
    JobCreated { job: JobId },
    JobAssigned { job: JobId, fulfiller: FulfillerId },
    /// A unit gave up on its job (unreachable or disqualified); the job is
    /// back in the pool unless it was cancelled.
    JobAborted { job: JobId, fulfiller: FulfillerId },
    JobCompleted { job: JobId },
    JobCancelled { job: JobId },

    /// A cell's material changed: mesh/texture refresh hook.
    SurfaceChanged {
        surface: GridCoord,
        surface_type: SurfaceType,
    },
    SurfaceDiscovered { surface: GridCoord },
    /// The discovery flood hit a previously-unknown open region.
    CaveDiscovered { at: GridCoord },
    /// A wall came down on its own.
    FallIn { surface: GridCoord },

    /// A hidden unit became visible.
    EntityDiscovered { fulfiller: FulfillerId },
    FulfillerSpawned { fulfiller: FulfillerId },
    MaterialSpawned {
        material: MaterialId,
        kind: MaterialKind,
    },
    /// Deposit counters changed; carries the new totals.
    MaterialAmountChanged { crystals: u32, ore: u32 },

    RaiderTrained {
        fulfiller: FulfillerId,
        training: Training,
    },
    RaiderUpgraded { fulfiller: FulfillerId, level: u8 },
    ToolCollected { fulfiller: FulfillerId, tool: Tool },
    DynamiteIgnited {
        material: MaterialId,
        surface: GridCoord,
    },
}
