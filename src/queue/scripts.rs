//! Lua scripts run atomically on the broker

/// Move the oldest waiting job to the active list and take its lock.
///
/// KEYS: wait, active. ARGV: lock key prefix, lock ttl (ms), lock owner.
pub const FETCH_NEXT: &str = r#"
local payload = redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
if not payload then
  return false
end
local job = cjson.decode(payload)
redis.call('SET', ARGV[1] .. job['id'], ARGV[3], 'PX', ARGV[2])
return payload
"#;

/// Re-queue active jobs whose lock expired, failing those stalled too often.
///
/// KEYS: active, wait, stalled counters, failed. ARGV: lock key prefix,
/// max stalled count, index of the last failed entry kept. Returns a flat list of (outcome, payload) pairs.
pub const RECOVER_STALLED: &str = r#"
local active = redis.call('LRANGE', KEYS[1], 0, -1)
local result = {}
for _, payload in ipairs(active) do
  local id = cjson.decode(payload)['id']
  if redis.call('EXISTS', ARGV[1] .. id) == 0 then
    if redis.call('LREM', KEYS[1], 1, payload) > 0 then
      local count = redis.call('HINCRBY', KEYS[3], id, 1)
      if count > tonumber(ARGV[2]) then
        redis.call('HDEL', KEYS[3], id)
        redis.call('LPUSH', KEYS[4], payload)
        redis.call('LTRIM', KEYS[4], 0, tonumber(ARGV[3]))
        table.insert(result, 'failed')
      else
        redis.call('RPUSH', KEYS[2], payload)
        table.insert(result, 'requeued')
      end
      table.insert(result, payload)
    end
  end
end
return result
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stall_failures_are_capped() {
        let push = RECOVER_STALLED.find("'LPUSH', KEYS[4]").unwrap();
        let trim = RECOVER_STALLED.find("'LTRIM', KEYS[4], 0, tonumber(ARGV[3])").unwrap();
        assert!(trim > push);
    }
}
