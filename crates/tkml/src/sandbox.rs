// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Execution sandbox.
//!
//! Every document runs in its own environment table. Chunks are loaded
//! with that table as their `_ENV`, so the names bound here are the only
//! names a document can resolve: there is no fallback to the VM globals.
//!
//! Bound names:
//!
//! - `queryParams`, `formParams`: read-only parameter bags
//! - `include`, `finish`, `export`: bound by the engine
//! - `string`, `table`, `math`, `utf8`: copies of the standard libraries
//! - `os`: only `date`, `time`, `clock` and `difftime`
//! - `json`, `console`
//! - `tostring`, `tonumber`, `type`, `pairs`, `ipairs`, `next`, `select`,
//!   `error`, `assert`, `pcall`, `unpack`

use crate::context::Params;
use crate::extensions::{create_console_module, create_json_module};
use mlua::{Function, Lua, LuaOptions, LuaSerdeExt, Result as LuaResult, StdLib, Table, Value};

/// Standard library tables copied into every environment.
const LIBRARIES: &[&str] = &["string", "table", "math", "utf8"];

/// Base functions bound into every environment.
const BASE_FUNCTIONS: &[&str] = &[
    "tostring", "tonumber", "type", "pairs", "ipairs", "next", "select", "error", "assert", "pcall",
];

/// `os` functions that expose neither the filesystem nor the process.
const OS_FUNCTIONS: &[&str] = &["date", "time", "clock", "difftime"];

/// Creates a Lua VM for one request.
///
/// Only the libraries the environments copy from are loaded; `io`,
/// `debug`, `package` and `coroutine` are never opened.
pub fn create_vm() -> LuaResult<Lua> {
    let lua = Lua::new_with(
        StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8 | StdLib::OS,
        LuaOptions::default(),
    )?;

    let globals = lua.globals();
    for name in ["load", "loadstring", "loadfile", "dofile", "require", "collectgarbage"] {
        globals.set(name, Value::Nil)?;
    }

    Ok(lua)
}

fn copy_table(lua: &Lua, source: &Table) -> LuaResult<Table> {
    let copy = lua.create_table()?;
    source.for_each(|key: Value, value: Value| copy.raw_set(key, value))?;
    Ok(copy)
}

/// Wraps `params` in a table that can be read and iterated but not
/// written.
pub fn read_only_params(lua: &Lua, name: &str, params: &Params) -> LuaResult<Table> {
    let data = lua.create_table()?;
    for (key, value) in params {
        data.raw_set(key.as_str(), value.as_str())?;
    }

    let proxy = lua.create_table()?;
    let meta = lua.create_table()?;
    meta.set("__index", data.clone())?;

    let bag = name.to_string();
    meta.set(
        "__newindex",
        lua.create_function(move |_, (_, key, _): (Value, Value, Value)| -> LuaResult<()> {
            let key = match key {
                Value::String(s) => s.to_string_lossy().to_string(),
                other => format!("{:?}", other),
            };
            Err(mlua::Error::RuntimeError(format!(
                "{} is read-only (cannot set '{}')",
                bag, key
            )))
        })?,
    )?;

    let next: Function = lua.globals().get("next")?;
    meta.set(
        "__pairs",
        lua.create_function(move |_, _: Value| Ok((next.clone(), data.clone(), Value::Nil)))?,
    )?;
    meta.set("__metatable", false)?;

    proxy.set_metatable(Some(meta));
    Ok(proxy)
}

/// Renders a script value into output text.
///
/// `nil` renders empty, strings verbatim, numbers and booleans the way
/// `tostring` does, and tables as compact JSON (falling back to
/// `tostring` when the table is not representable).
pub fn render_value(lua: &Lua, value: Value) -> LuaResult<String> {
    match value {
        Value::Nil => Ok(String::new()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::String(s) => Ok(s.to_string_lossy().to_string()),
        Value::Integer(_) | Value::Number(_) => match lua.coerce_string(value)? {
            Some(s) => Ok(s.to_string_lossy().to_string()),
            None => Ok(String::new()),
        },
        Value::Table(_) => match lua.from_value::<serde_json::Value>(value.clone()) {
            Ok(json) => serde_json::to_string(&json).map_err(mlua::Error::external),
            Err(_) => lua_tostring(lua, value),
        },
        other => lua_tostring(lua, other),
    }
}

fn lua_tostring(lua: &Lua, value: Value) -> LuaResult<String> {
    let tostring: Function = lua.globals().get("tostring")?;
    tostring.call(value)
}

/// Function form of [`render_value`], handed to synthesized programs.
pub fn value_renderer(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, value: Value| render_value(lua, value))
}

/// Builds the base environment of `document`: parameter bags and the
/// utility allow-list. The engine adds `include`, `finish` and `export`.
pub fn create_environment(
    lua: &Lua,
    document: &str,
    query_params: &Params,
    form_params: &Params,
) -> LuaResult<Table> {
    let globals = lua.globals();
    let env = lua.create_table()?;

    for name in LIBRARIES {
        let library: Table = globals.get(*name)?;
        env.set(*name, copy_table(lua, &library)?)?;
    }

    let os: Table = globals.get("os")?;
    let safe_os = lua.create_table()?;
    for name in OS_FUNCTIONS {
        let function: Function = os.get(*name)?;
        safe_os.set(*name, function)?;
    }
    env.set("os", safe_os)?;

    for name in BASE_FUNCTIONS {
        let function: Function = globals.get(*name)?;
        env.set(*name, function)?;
    }
    let table: Table = globals.get("table")?;
    let unpack: Function = table.get("unpack")?;
    env.set("unpack", unpack)?;

    env.set("json", create_json_module(lua)?)?;
    env.set("console", create_console_module(lua, document)?)?;

    env.set("queryParams", read_only_params(lua, "queryParams", query_params)?)?;
    env.set("formParams", read_only_params(lua, "formParams", form_params)?)?;

    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn eval(lua: &Lua, env: &Table, code: &str) -> LuaResult<Value> {
        lua.load(code).set_environment(env.clone()).eval()
    }

    #[test]
    fn test_only_allow_listed_names_resolve() {
        let lua = create_vm().unwrap();
        let env = create_environment(&lua, "a.tkml", &Params::new(), &Params::new()).unwrap();

        for name in ["io", "debug", "require", "load", "dofile", "loadfile", "print", "_G", "setmetatable", "rawset"] {
            let value = eval(&lua, &env, &format!("return {}", name)).unwrap();
            assert!(value.is_nil(), "{} should not resolve", name);
        }
        let value = eval(&lua, &env, "return os.execute").unwrap();
        assert!(value.is_nil());

        let value: String = lua
            .load("return string.upper('ok') .. math.floor(2.7) .. os.date('%Y'):len()")
            .set_environment(env)
            .eval()
            .unwrap();
        assert_eq!(value, "OK24");
    }

    #[test]
    fn test_params_are_read_only_and_iterable() {
        let lua = create_vm().unwrap();
        let query = params(&[("name", "tkml"), ("page", "2")]);
        let env = create_environment(&lua, "a.tkml", &query, &Params::new()).unwrap();

        let name: String = lua.load("return queryParams.name").set_environment(env.clone()).eval().unwrap();
        assert_eq!(name, "tkml");

        let count: i64 = lua
            .load("local n = 0 for k, v in pairs(queryParams) do n = n + 1 end return n")
            .set_environment(env.clone())
            .eval()
            .unwrap();
        assert_eq!(count, 2);

        let err = eval(&lua, &env, "queryParams.name = 'x'").unwrap_err();
        assert!(err.to_string().contains("queryParams is read-only"));

        let missing = eval(&lua, &env, "return formParams.anything").unwrap();
        assert!(missing.is_nil());
    }

    #[test]
    fn test_environments_do_not_share_library_tables() {
        let lua = create_vm().unwrap();
        let a = create_environment(&lua, "a.tkml", &Params::new(), &Params::new()).unwrap();
        let b = create_environment(&lua, "b.tkml", &Params::new(), &Params::new()).unwrap();

        eval(&lua, &a, "string.shout = function(s) return s .. '!' end").unwrap();
        assert!(eval(&lua, &b, "return string.shout").unwrap().is_nil());
    }

    #[test]
    fn test_render_value() {
        let lua = create_vm().unwrap();
        let env = create_environment(&lua, "a.tkml", &Params::new(), &Params::new()).unwrap();
        let render = |code: &str| render_value(&lua, eval(&lua, &env, code).unwrap()).unwrap();

        assert_eq!(render("return nil"), "");
        assert_eq!(render("return 'text'"), "text");
        assert_eq!(render("return 1 + 1"), "2");
        assert_eq!(render("return 1 / 2"), "0.5");
        assert_eq!(render("return true"), "true");
        assert_eq!(render("return { 1, 2, 3 }"), "[1,2,3]");
        assert_eq!(render("return { name = 'x' }"), r#"{"name":"x"}"#);
        assert!(render("return function() end").starts_with("function"));
    }
}
