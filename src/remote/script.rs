use redis::{Cmd, Script};

// Adds ARGV[1] to KEYS[1]; sets the absolute expiry ARGV[2] only when the
// key did not exist before this call, so later increments never extend it.
pub const INCR_EXPIRE_NX_LUA: &str = r#"
local key = KEYS[1]
local amount = tonumber(ARGV[1])
local expire_at = tonumber(ARGV[2])

local existed = redis.call('EXISTS', key)
local value = redis.call('INCRBY', key, amount)
if existed == 0 then
  redis.call('EXPIREAT', key, expire_at)
end

return value
"#;

pub fn incr_expire_nx() -> Script {
    Script::new(INCR_EXPIRE_NX_LUA)
}

// Plain EVAL form for pipelines, which do not retry EVALSHA on NOSCRIPT.
pub fn incr_expire_nx_eval(key: &str, amount: i64, expire_at: i64) -> Cmd {
    let mut cmd = redis::cmd("EVAL");
    cmd.arg(INCR_EXPIRE_NX_LUA)
        .arg(1)
        .arg(key)
        .arg(amount)
        .arg(expire_at);
    cmd
}
