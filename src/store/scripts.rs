/// Lua script for the atomic sliding-window admission decision.
///
/// KEYS\[1\] = window key (`rl:{user_id}:{window_seconds}`)
/// ARGV\[1\] = window length in seconds
/// ARGV\[2\] = effective limit
/// ARGV\[3\] = now in epoch milliseconds
/// ARGV\[4\] = event id (unique per request)
///
/// Trims entries older than the window, counts the survivors, admits and
/// appends when under the limit, refreshes the key TTL, and reports when the
/// window resets. Doing trim-count-insert-expire in one server-side call is
/// what makes the admission atomic across concurrent instances.
///
/// Returns `{allowed, limit, remaining, reset_at_ms}`.
pub const SLIDING_WINDOW: &str = r"
local window_ms = tonumber(ARGV[1]) * 1000
local limit = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now_ms - window_ms)
local used = redis.call('ZCARD', KEYS[1])
local allowed = 0
local remaining = 0
if used < limit then
    redis.call('ZADD', KEYS[1], now_ms, ARGV[4])
    allowed = 1
    remaining = limit - used - 1
end
redis.call('EXPIRE', KEYS[1], tonumber(ARGV[1]) + 1)
local reset_ms = now_ms + window_ms
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
if oldest[2] then
    reset_ms = tonumber(oldest[2]) + window_ms
end
return {allowed, limit, remaining, reset_ms}
";

/// Lua script checking whether a source address is currently blocked.
///
/// KEYS\[1\] = `blocked:{addr}`
///
/// Returns `{blocked, remaining_ttl_ms}`.
pub const ABUSE_CHECK: &str = r"
local ttl_ms = redis.call('PTTL', KEYS[1])
if ttl_ms == -2 then
    return {0, 0}
end
if ttl_ms == -1 then
    ttl_ms = 0
end
return {1, ttl_ms}
";

/// Lua script recording one invalid-credential event for a source address,
/// escalating to a block when the attempt threshold is reached.
///
/// KEYS\[1\] = `attempts:{addr}`
/// KEYS\[2\] = `blocked:{addr}`
/// ARGV\[1\] = attempt-window TTL in seconds
/// ARGV\[2\] = attempts that trigger a block
/// ARGV\[3\] = block TTL in seconds
///
/// Returns `{attempt_count, newly_blocked}`.
pub const ABUSE_RECORD: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], tonumber(ARGV[1]))
end
local blocked = 0
if count >= tonumber(ARGV[2]) then
    redis.call('SET', KEYS[2], '1', 'EX', tonumber(ARGV[3]))
    blocked = 1
end
return {count, blocked}
";
