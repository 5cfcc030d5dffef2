use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::limits::MAX_ROOMS;
use crate::model::{Room, RoomId};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("catalog has no rooms")]
    Empty,
    #[error("catalog has too many rooms: {0}")]
    TooManyRooms(usize),
    #[error("duplicate room id: {0}")]
    DuplicateRoom(RoomId),
    #[error("room {0} has zero capacity")]
    ZeroCapacity(RoomId),
    #[error("room {0} sets auto_convert_hours but is not flexible")]
    ConversionOnFixedRoom(RoomId),
}

/// Immutable room configuration. Shared by `Arc` and never locked.
#[derive(Debug, Clone)]
pub struct RoomCatalog {
    rooms: Vec<Room>,
    by_id: HashMap<RoomId, usize>,
    total_capacity: u32,
}

impl RoomCatalog {
    pub fn new(rooms: Vec<Room>) -> Result<Self, CatalogError> {
        if rooms.is_empty() {
            return Err(CatalogError::Empty);
        }
        if rooms.len() > MAX_ROOMS {
            return Err(CatalogError::TooManyRooms(rooms.len()));
        }
        let mut by_id = HashMap::with_capacity(rooms.len());
        let mut total_capacity = 0u32;
        for (idx, room) in rooms.iter().enumerate() {
            if room.capacity == 0 {
                return Err(CatalogError::ZeroCapacity(room.id.clone()));
            }
            if !room.is_flexible && room.auto_convert_hours.is_some() {
                return Err(CatalogError::ConversionOnFixedRoom(room.id.clone()));
            }
            if by_id.insert(room.id.clone(), idx).is_some() {
                return Err(CatalogError::DuplicateRoom(room.id.clone()));
            }
            total_capacity = total_capacity.saturating_add(room.capacity);
        }
        Ok(Self {
            rooms,
            by_id,
            total_capacity,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let rooms: Vec<Room> = serde_json::from_str(json)?;
        Self::new(rooms)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn get(&self, id: &str) -> Option<&Room> {
        self.by_id.get(id).map(|&idx| &self.rooms[idx])
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    /// Sum of all room capacities; the upper bound for a single request.
    pub fn total_capacity(&self) -> u32 {
        self.total_capacity
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
