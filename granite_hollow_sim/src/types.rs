// Core types shared across the simulation.
//
// Defines spatial coordinates (`GridCoord` for cells, `WorldPos` for
// continuous unit positions), entity identifiers (strongly-typed UUID v4
// wrappers), and the compact `SurfaceIdx` used as a path-cache key. All types
// derive `Serialize` and `Deserialize` for save/load.
//
// **Critical constraint: determinism.** Entity IDs are generated from the
// sim's `GameRng` (re-exported from `granite_hollow_prng`). Do not use
// external UUID libraries or OS entropy.

use granite_hollow_prng::GameRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Spatial types
// ---------------------------------------------------------------------------

/// A cell position in the 2D terrain grid.
///
/// X grows east, Y grows south; (0, 0) is the north-west corner of the level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: i32,
    pub y: i32,
}

impl GridCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The four orthogonal neighbors, in left/up/right/down order.
    ///
    /// The order is load-bearing: support counting, cascade recursion, and
    /// fall-in searches all walk neighbors in this fixed order so results
    /// are reproducible.
    pub fn orthogonal_neighbors(self) -> [GridCoord; 4] {
        [
            GridCoord::new(self.x - 1, self.y),
            GridCoord::new(self.x, self.y - 1),
            GridCoord::new(self.x + 1, self.y),
            GridCoord::new(self.x, self.y + 1),
        ]
    }

    /// All eight surrounding neighbors, row-major. Used by discovery
    /// flood-fill, which reveals diagonally-touching cells too.
    pub fn all_neighbors(self) -> [GridCoord; 8] {
        [
            GridCoord::new(self.x - 1, self.y - 1),
            GridCoord::new(self.x, self.y - 1),
            GridCoord::new(self.x + 1, self.y - 1),
            GridCoord::new(self.x - 1, self.y),
            GridCoord::new(self.x + 1, self.y),
            GridCoord::new(self.x - 1, self.y + 1),
            GridCoord::new(self.x, self.y + 1),
            GridCoord::new(self.x + 1, self.y + 1),
        ]
    }
}

impl fmt::Display for GridCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A continuous position in world space (same plane as the grid, scaled by
/// the configured tile size).
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldPos {
    pub x: f32,
    pub z: f32,
}

impl WorldPos {
    pub const fn new(x: f32, z: f32) -> Self {
        Self { x, z }
    }

    pub fn distance_sq(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        dx * dx + dz * dz
    }

    pub fn distance(self, other: Self) -> f32 {
        self.distance_sq(other).sqrt()
    }

    /// The grid cell containing this position, for a given tile size.
    pub fn to_grid(self, tile_size: f32) -> GridCoord {
        GridCoord::new(
            (self.x / tile_size).floor() as i32,
            (self.z / tile_size).floor() as i32,
        )
    }
}

impl fmt::Display for WorldPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.z)
    }
}

// ---------------------------------------------------------------------------
// Compact surface index — path-cache key
// ---------------------------------------------------------------------------

/// Flat index of an in-bounds surface (`x + y * width`).
///
/// Path-cache keys are `(SurfaceIdx, SurfaceIdx)` pairs, so cache lookups
/// never hash coordinates or strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceIdx(pub u32);

// ---------------------------------------------------------------------------
// Entity IDs — deterministic UUID v4
// ---------------------------------------------------------------------------

/// A UUID v4, generated deterministically from the simulation PRNG.
///
/// Layout follows RFC 4122: 128 bits with version nibble (bits 48–51) set
/// to `0100` and variant bits (bits 64–65) set to `10`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimUuid([u8; 16]);

impl SimUuid {
    /// Generate a deterministic UUID v4 from the simulation PRNG.
    pub fn new_v4(rng: &mut GameRng) -> Self {
        let mut bytes = rng.next_128_bits();
        // Set version nibble (byte 6, upper nibble) to 0100.
        bytes[6] = (bytes[6] & 0x0F) | 0x40;
        // Set variant bits (byte 8, upper 2 bits) to 10.
        bytes[8] = (bytes[8] & 0x3F) | 0x80;
        Self(bytes)
    }

    /// Parse a UUID from its 8-4-4-4-12 hex string representation.
    pub fn from_str(s: &str) -> Option<Self> {
        let hex: String = s.chars().filter(|c| *c != '-').collect();
        if hex.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

// Custom serde: serialize as the 8-4-4-4-12 hex string so SimUuid can be
// used as a JSON map key (serde_json requires string keys).
impl Serialize for SimUuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SimUuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SimUuid::from_str(&s).ok_or_else(|| serde::de::Error::custom("invalid UUID format"))
    }
}

impl fmt::Debug for SimUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimUuid({})", self)
    }
}

impl fmt::Display for SimUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Standard 8-4-4-4-12 hex representation.
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3],
            b[4], b[5],
            b[6], b[7],
            b[8], b[9],
            b[10], b[11], b[12], b[13], b[14], b[15],
        )
    }
}

// ---------------------------------------------------------------------------
// Strongly-typed entity ID wrappers
// ---------------------------------------------------------------------------

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub SimUuid);

        impl $name {
            pub fn new(rng: &mut GameRng) -> Self {
                Self(SimUuid::new_v4(rng))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

entity_id!(/// Unique identifier for a job (a unit of work).
JobId);
entity_id!(/// Unique identifier for a fulfiller (raider or vehicle).
FulfillerId);
entity_id!(/// Unique identifier for a building.
BuildingId);
entity_id!(/// Unique identifier for a material pickup (crystal, ore, ...).
MaterialId);
