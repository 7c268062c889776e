//! Lua script engine
//!
//! Every call gets a fresh interpreter with `os`, `io`, `loadfile`,
//! `dofile` and `debug` removed. Context variables are bound as globals and
//! a `log` table forwards to tracing.

use crate::script::{ScriptContext, ScriptEngine, ScriptError};
use mlua::prelude::*;
use serde_json::Value;

/// Lua 5.4 engine
#[derive(Debug, Default)]
pub struct LuaEngine;

impl LuaEngine {
    pub fn new() -> Self {
        Self
    }

    fn eval(&self, name: &str, source: &str, ctx: &ScriptContext) -> LuaResult<Value> {
        let lua = Lua::new();
        sandbox_globals(&lua)?;
        register_log_api(&lua, ctx)?;

        let globals = lua.globals();
        for (key, value) in &ctx.variables {
            globals.set(key.as_str(), json_value_to_lua(&lua, value)?)?;
        }

        let result: LuaValue = lua.load(source).set_name(name).eval()?;
        lua_value_to_json(result)
    }
}

impl ScriptEngine for LuaEngine {
    fn execute(&self, name: &str, source: &str, ctx: &ScriptContext) -> Result<Value, ScriptError> {
        self.eval(name, source, ctx)
            .map_err(|e| ScriptError::Execution {
                lang: "lua".to_string(),
                message: e.to_string(),
            })
    }
}

fn sandbox_globals(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    globals.set("os", LuaValue::Nil)?;
    globals.set("io", LuaValue::Nil)?;
    globals.set("loadfile", LuaValue::Nil)?;
    globals.set("dofile", LuaValue::Nil)?;
    globals.set("debug", LuaValue::Nil)?;
    Ok(())
}

fn register_log_api(lua: &Lua, ctx: &ScriptContext) -> LuaResult<()> {
    let log = lua.create_table()?;

    let logger = ctx.logger.clone();
    log.set(
        "debug",
        lua.create_function(move |_, msg: String| {
            logger.debug(&msg);
            Ok(())
        })?,
    )?;

    let logger = ctx.logger.clone();
    log.set(
        "info",
        lua.create_function(move |_, msg: String| {
            logger.info(&msg);
            Ok(())
        })?,
    )?;

    let logger = ctx.logger.clone();
    log.set(
        "warn",
        lua.create_function(move |_, msg: String| {
            logger.warn(&msg);
            Ok(())
        })?,
    )?;

    let logger = ctx.logger.clone();
    log.set(
        "error",
        lua.create_function(move |_, msg: String| {
            logger.error(&msg);
            Ok(())
        })?,
    )?;

    lua.globals().set("log", log)?;
    Ok(())
}

fn json_value_to_lua(lua: &Lua, value: &Value) -> LuaResult<LuaValue> {
    match value {
        Value::Null => Ok(LuaValue::Nil),
        Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(LuaValue::Integer(i)),
            None => Ok(LuaValue::Number(n.as_f64().unwrap_or(0.0))),
        },
        Value::String(s) => lua.create_string(s).map(LuaValue::String),
        Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i as i64 + 1, json_value_to_lua(lua, item)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        Value::Object(map) => {
            let table = lua.create_table()?;
            for (k, v) in map {
                table.set(k.as_str(), json_value_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
    }
}

// Tables with a sequence part become arrays, everything else an object.
fn lua_value_to_json(value: LuaValue) -> LuaResult<Value> {
    match value {
        LuaValue::Nil => Ok(Value::Null),
        LuaValue::Boolean(b) => Ok(Value::Bool(b)),
        LuaValue::Integer(i) => Ok(Value::Number(i.into())),
        LuaValue::Number(n) => Ok(serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        LuaValue::String(s) => Ok(Value::String(s.to_str()?.to_string())),
        LuaValue::Table(t) => {
            let len = t.raw_len();
            if len > 0 {
                let mut items = Vec::with_capacity(len);
                for i in 1..=len {
                    let v: LuaValue = t.raw_get(i)?;
                    items.push(lua_value_to_json(v)?);
                }
                Ok(Value::Array(items))
            } else {
                let mut map = serde_json::Map::new();
                for pair in t.pairs::<String, LuaValue>() {
                    let (k, v) = pair?;
                    map.insert(k, lua_value_to_json(v)?);
                }
                Ok(Value::Object(map))
            }
        }
        _ => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(source: &str, variables: Value) -> Result<Value, ScriptError> {
        let ctx = ScriptContext::new("test", variables.as_object().cloned().unwrap());
        LuaEngine::new().execute("test", source, &ctx)
    }

    #[test]
    fn test_globals_are_bound() {
        let result = run(
            "return url .. '#' .. index",
            json!({"url": "https://example.com/", "index": 3}),
        )
        .unwrap();
        assert_eq!(result, json!("https://example.com/#3"));
    }

    #[test]
    fn test_array_variable_is_one_based() {
        let result = run("return array[1] .. array[2]", json!({"array": ["a", "b"]})).unwrap();
        assert_eq!(result, json!("ab"));
    }

    #[test]
    fn test_nil_result_is_null() {
        assert_eq!(run("return nil", json!({})).unwrap(), Value::Null);
        assert_eq!(run("local x = 1", json!({})).unwrap(), Value::Null);
    }

    #[test]
    fn test_table_results() {
        assert_eq!(
            run("return {1, 2, 3}", json!({})).unwrap(),
            json!([1, 2, 3])
        );
        assert_eq!(
            run("return {name = 'x'}", json!({})).unwrap(),
            json!({"name": "x"})
        );
    }

    #[test]
    fn test_sandbox_removes_os_and_io() {
        assert!(run("return os.time()", json!({})).is_err());
        assert!(run("return io.read()", json!({})).is_err());
        assert_eq!(run("return string.len('abc')", json!({})).unwrap(), json!(3));
    }

    #[test]
    fn test_log_table_is_available() {
        assert_eq!(
            run("log.info('hello'); return 1", json!({})).unwrap(),
            json!(1)
        );
    }

    #[test]
    fn test_syntax_error_reported() {
        let err = run("return (", json!({})).unwrap_err();
        assert!(matches!(err, ScriptError::Execution { .. }));
    }
}
