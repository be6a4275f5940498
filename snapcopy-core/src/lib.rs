/*!
# snapcopy core

Copies network snapshots between IP Fabric server instances.

A copy is a strictly sequential workflow:

- resolve the snapshot reference (`$last`, `$prev`, `$lastLocked` or an id) on the source
- request an export and poll until it is ready, bounded by a timeout
- download the archive to local storage
- upload it to the destination, which imports it as a new snapshot
- delete the local archive unless asked to keep it

## Architecture

The orchestrator ([`SnapshotTransfer`]) only depends on the [`SnapshotSource`]
and [`SnapshotSink`] ports. [`IpfClient`] implements both over the IP Fabric
REST API, discovering each server's API version independently.

## Usage

```rust,no_run
use snapcopy_core::{
    ConfigOverrides, IpfClient, ProcessEnv, ServerRole, SnapshotTransfer, TransferConfig,
};

# async fn run() -> snapcopy_core::Result<()> {
let config = TransferConfig::resolve(ConfigOverrides::default(), &ProcessEnv)?;
let source = IpfClient::connect(ServerRole::Source, &config.source, config.verify_tls).await?;
let destination =
    IpfClient::connect(ServerRole::Destination, &config.destination, config.verify_tls).await?;

let transfer = SnapshotTransfer::new(source, destination, (&config).into());
let report = transfer.copy_reference(&config.snapshot).await?;
println!("{} -> {}", report.source_id, report.destination_id);
# Ok(())
# }
```
*/

pub mod archive;
pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod snapshot;
pub mod transfer;


pub use archive::LocalArchive;
pub use client::{ExportJob, ExportStatus, IpfClient, SnapshotSink, SnapshotSource};
pub use config::{
    ConfigOverrides, Credential, DotenvEnv, EnvSource, ProcessEnv, ServerEndpoint, ServerRole,
    TransferConfig,
};
pub use error::{Result, SnapCopyError};
pub use observability::{init_logging, LoggingConfig};
pub use snapshot::{parse_selection, SnapshotInfo, SnapshotRef};
pub use transfer::{SnapshotTransfer, TransferOptions, TransferReport, TransferSummary};
pub use snapcopy_retry::PollPolicy;
