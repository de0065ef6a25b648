/*!
# voltlink

Host-side engine for a wireless voltage sensor: link lifecycle, calibration
handshake, command dispatch and the measurement pipeline.

## Usage

```no_run
use voltlink::config::AppConfig;
use voltlink::link::{SensorLink, TransportKind};
use voltlink_shared::Command;

let link = SensorLink::new(AppConfig::new(), TransportKind::Simulated);
link.start_link();
link.enqueue_command(Command::Start).ok();
println!("{:?}", link.snapshot());
```

## Modules

- [`link`] - Caller-facing handle and engine thread
- [`session`] - Connection lifecycle, calibration handshake and dispatcher
- [`pipeline`] - Notification decoding into calibration and voltage
- [`state`] - Runtime state and published snapshots
- [`transport`] - Physical link abstraction and implementations
- [`config`] - TOML configuration
*/

pub mod config;
pub mod link;
pub mod pipeline;
pub mod session;
pub mod state;
pub mod transport;

pub use config::AppConfig;
pub use link::{CommandError, SensorLink, TransportKind};
pub use state::{LinkState, Snapshot};
