use sqlx::{SqliteConnection, SqlitePool};

pub mod clusters;
pub mod dns_domains;
pub mod dns_tasks;
pub mod ip_addresses;
pub mod message_receivers;
pub mod message_tasks;
pub mod messages;
pub mod migrations;
pub mod node_tasks;
pub mod nodes;
pub mod policies;
pub mod servers;
pub mod settings;
pub mod stats;
pub mod task_cursors;
pub mod users;

pub type Db = SqlitePool;

/// Connection handle accepted by every persistence function. Pass a pooled
/// connection for reads or `&mut *tx` to take part in a transaction.
pub type Conn = SqliteConnection;

/// Soft-delete marker stored in every `state` column.
pub const STATE_ENABLED: i64 = 1;
pub const STATE_DISABLED: i64 = 0;

pub use clusters::{ClusterDnsInfo, ClusterRecord, NewCluster};
pub use dns_tasks::DnsTaskRecord;
pub use ip_addresses::{IpAddressRecord, NewIpAddress};
pub use message_receivers::{MessageReceiverRecord, NewMessageReceiver, ReceiverScope};
pub use message_tasks::{MessageTaskRecord, NewMessageTask};
pub use messages::{MessageFilter, MessageRecord, NewMessage};
pub use migrations::{MigrationLabel, MigrationRunOutcome, MigrationSnapshot};
pub use node_tasks::NodeTaskRecord;
pub use nodes::NodeRecord;
pub use servers::{NewServer, ServerDnsRecord, ServerMatchFilter, ServerRecord};
