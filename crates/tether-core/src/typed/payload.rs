//! Payload trait - ストリームに載せられる型の境界
//!
//! # Trait Bounds
//! - `Serialize`: フィールドマップへのエンコード
//! - `DeserializeOwned`: フィールドマップからのデコード
//! - `Send + Sync + 'static`: ハンドラを複数タスクから共有するため

use serde::Serialize;
use serde::de::DeserializeOwned;

pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}
