use thiserror::Error;

pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlacementError {
    #[error("cannot schedule a zero count unit")]
    ZeroCount,

    /// A generation could not place its full count, even oversubscribed.
    #[error("count remaining after complex schedule: {remaining} unplaced at offset {offset}")]
    CapacityExhausted { remaining: u32, offset: u32 },
}
