//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryBackend**: すべての ports をプロセス内で実装
//!
//! # 本番用実装
//! 本番用の実装は別クレートに配置します：
//! - `hopper-redis`: RedisBackend

pub mod inmem;

pub use self::inmem::InMemoryBackend;
