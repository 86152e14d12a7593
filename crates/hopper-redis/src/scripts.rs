//! Lua script executing a `WriteBatch` atomically.
//!
//! KEYS[1] = index (sorted set), KEYS[2] = registry (hash).
//! ARGV is a flat op stream:
//!
//! | op       | operands              |
//! |----------|-----------------------|
//! | `zadd`   | id, score             |
//! | `zrem`   | id                    |
//! | `hset`   | id, raw               |
//! | `cas`    | id, expected, raw     |
//! | `zclear` | -                     |
//! | `hclear` | -                     |
//!
//! Returns 1 when applied, 0 when a `cas` precondition failed (nothing written).

use hopper_core::ports::{WriteBatch, WriteOp};

pub(crate) const COMMIT_SCRIPT: &str = r#"
local index, registry = KEYS[1], KEYS[2]

local i = 1
while i <= #ARGV do
  local op = ARGV[i]
  if op == 'cas' then
    if redis.call('HGET', registry, ARGV[i + 1]) ~= ARGV[i + 2] then
      return 0
    end
    i = i + 4
  elseif op == 'zadd' or op == 'hset' then
    i = i + 3
  elseif op == 'zrem' then
    i = i + 2
  elseif op == 'zclear' or op == 'hclear' then
    i = i + 1
  else
    return redis.error_reply('unknown op ' .. tostring(op))
  end
end

i = 1
while i <= #ARGV do
  local op = ARGV[i]
  if op == 'zadd' then
    redis.call('ZADD', index, ARGV[i + 2], ARGV[i + 1])
    i = i + 3
  elseif op == 'zrem' then
    redis.call('ZREM', index, ARGV[i + 1])
    i = i + 2
  elseif op == 'hset' then
    redis.call('HSET', registry, ARGV[i + 1], ARGV[i + 2])
    i = i + 3
  elseif op == 'cas' then
    redis.call('HSET', registry, ARGV[i + 1], ARGV[i + 3])
    i = i + 4
  elseif op == 'zclear' then
    redis.call('DEL', index)
    i = i + 1
  else
    redis.call('DEL', registry)
    i = i + 1
  end
end
return 1
"#;

/// Flatten a batch into the script's ARGV.
pub(crate) fn encode_args(batch: WriteBatch) -> Vec<String> {
    let mut args = Vec::with_capacity(batch.ops().len() * 3);
    for op in batch.into_ops() {
        match op {
            WriteOp::IndexInsert { task_id, score } => {
                args.push("zadd".to_string());
                args.push(task_id.into_inner());
                args.push(score.value().to_string());
            }
            WriteOp::IndexRemove { task_id } => {
                args.push("zrem".to_string());
                args.push(task_id.into_inner());
            }
            WriteOp::RegistryPut { task_id, raw } => {
                args.push("hset".to_string());
                args.push(task_id.into_inner());
                args.push(raw);
            }
            WriteOp::RegistryCompareAndSwap {
                task_id,
                expected,
                raw,
            } => {
                args.push("cas".to_string());
                args.push(task_id.into_inner());
                args.push(expected);
                args.push(raw);
            }
            WriteOp::IndexClear => args.push("zclear".to_string()),
            WriteOp::RegistryClear => args.push("hclear".to_string()),
        }
    }
    args
}
