//! Server-side Lua scripts for atomic queue operations.
//!
//! Both scripts take the top-ranked member of a sorted set (highest score
//! first, ZREVRANGE) and remove it in the same indivisible step, so two
//! processes racing on the same queue can never receive the same job.
//! `redis::Script` caches the SHA and falls back to EVAL on NOSCRIPT.
//!
//! The ZPOPMIN names are historical: the scripts pop the *highest*-scoring
//! member. The names are kept so the script SHAs match existing
//! deployments.

use redis::Script;

/// Pops the top-ranked member of a sorted set, or returns nil when empty.
pub const ZPOPMIN: &str = r#"
  local resp = redis.call('zrevrange', KEYS[1], '0', '0')
  if (resp[1] ~= nil) then
    local val = resp[# resp]
    redis.call('zrem', KEYS[1], val)
    return val
  else
    return false
  end
"#;

/// Pops the top-ranked member and adds it to a claim set in the same step.
///
/// KEYS[1] is the queue sorted set, KEYS[2] the claiming process's WIP set.
pub const ZPOPMIN_SADD: &str = r#"
  local resp = redis.call('zrevrange', KEYS[1], '0', '0')
  if (resp[1] ~= nil) then
    local val = resp[# resp]
    redis.call('zrem', KEYS[1], val)
    redis.call('sadd', KEYS[2], val)
    return val
  else
    return false
  end
"#;

/// Builds the pop script.
pub fn pop_highest() -> Script {
    Script::new(ZPOPMIN)
}

/// Builds the claim script.
pub fn claim_highest() -> Script {
    Script::new(ZPOPMIN_SADD)
}
