use std::fmt;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::naval_errors::NCErr;

const TIMESTAMP_SHIFT: u32 = 16;
const WORKER_SHIFT: u32 = 6;
const SEQUENCE_SHIFT: u32 = 1;

pub const MAX_WORKER_ID: u16 = 0x3FF; // 10 bits
const MAX_SEQUENCE: u64 = 0x1F; // 5 bits, 32 ids per ms and worker
const PLAYER_BIT: u64 = 1;

/// One participant's view of a match.
///
/// Layout, high to low: 48 bits of unix milliseconds, 10 bits worker id,
/// 5 bits per-millisecond sequence, 1 bit player index. Clearing the player
/// bit yields the base id that both players share and that keys the
/// `game_sessions` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn from_raw(raw: u64) -> Self {
        SessionId(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn base(self) -> SessionId {
        SessionId(self.0 & !PLAYER_BIT)
    }

    /// 0 for the creator of the match, 1 for the joiner.
    pub fn player(self) -> u8 {
        (self.0 & PLAYER_BIT) as u8
    }

    pub fn opponent(self) -> SessionId {
        SessionId(self.0 ^ PLAYER_BIT)
    }

    pub fn with_player(self, player: u8) -> SessionId {
        SessionId((self.0 & !PLAYER_BIT) | (player as u64 & PLAYER_BIT))
    }

    pub fn timestamp_ms(self) -> u64 {
        self.0 >> TIMESTAMP_SHIFT
    }

    pub fn worker_id(self) -> u16 {
        ((self.0 >> WORKER_SHIFT) & MAX_WORKER_ID as u64) as u16
    }

    /// Storage representation. Ids minted from a real clock never reach the
    /// sign bit.
    pub fn as_db(self) -> i64 {
        self.0 as i64
    }

    pub fn from_db(value: i64) -> Result<SessionId, NCErr> {
        if value <= 0 {
            return Err(NCErr::InvalidSessionId);
        }
        Ok(SessionId(value as u64))
    }

    /// Parses the decimal form used on the wire. Zero is never a valid id.
    pub fn parse(value: &str) -> Result<SessionId, NCErr> {
        match value.trim().parse::<u64>() {
            Ok(raw) if raw > 0 && raw <= i64::MAX as u64 => Ok(SessionId(raw)),
            _ => Err(NCErr::InvalidSessionId),
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct MintState {
    last_ms: u64,
    sequence: u64,
}

/// Mints time-ordered base session ids for one worker process.
pub struct IdGenerator {
    worker_id: u16,
    state: Mutex<MintState>,
}

impl IdGenerator {
    pub fn new(worker_id: u16) -> Result<Self, NCErr> {
        if worker_id > MAX_WORKER_ID {
            return Err(NCErr::Config(format!(
                "worker id {} does not fit in 10 bits",
                worker_id
            )));
        }
        Ok(Self {
            worker_id,
            state: Mutex::new(MintState {
                last_ms: 0,
                sequence: 0,
            }),
        })
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    /// Returns a fresh base id (player bit 0). Spins until the next
    /// millisecond once 32 ids were handed out in the current one.
    pub fn mint(&self) -> SessionId {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // A clock stepping backwards keeps counting inside the last seen ms.
        let mut now = current_ms().max(state.last_ms);
        if now == state.last_ms {
            state.sequence += 1;
            if state.sequence > MAX_SEQUENCE {
                while now <= state.last_ms {
                    std::hint::spin_loop();
                    now = current_ms();
                }
                state.sequence = 0;
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        SessionId(
            (now << TIMESTAMP_SHIFT)
                | ((self.worker_id as u64) << WORKER_SHIFT)
                | (state.sequence << SEQUENCE_SHIFT),
        )
    }
}

fn current_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
