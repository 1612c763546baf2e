mod digest;
mod entry;
mod resolver;

pub use digest::{md5_hex, parse_digest, MD5_HEX_LEN};
pub use entry::{CacheEntry, ContentEntry, EntryStore};
pub use resolver::{CacheEntryResolver, Resolution, ResolveOptions, ResolvedFile};
