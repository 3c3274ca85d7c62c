//! Host-written stand-ins behind the sandbox's `require`.
//!
//! Each module is a plain table of pure functions — no network, no files, no
//! way back out of the isolate.

use mlua::{Lua, Table, Value as LuaValue};
use std::time::{SystemTime, UNIX_EPOCH};

use retrobbs_shared::text;

pub const ALLOWED_MODULES: &[&str] = &["toolkit", "dates"];

pub fn build_module<'a>(lua: &'a Lua, name: &str) -> mlua::Result<Option<Table<'a>>> {
    match name {
        "toolkit" => toolkit(lua).map(Some),
        "dates" => dates(lua).map(Some),
        _ => Ok(None),
    }
}

fn toolkit(lua: &Lua) -> mlua::Result<Table<'_>> {
    let module = lua.create_table()?;

    module.set(
        "deep_equal",
        lua.create_function(|_, (a, b): (LuaValue, LuaValue)| Ok(deep_equal(&a, &b)))?,
    )?;

    module.set(
        "pick",
        lua.create_function(|lua, (source, keys): (Table, Table)| {
            let picked = lua.create_table()?;
            for key in keys.sequence_values::<String>() {
                let key = key?;
                let value: LuaValue = source.get(key.as_str())?;
                if value != LuaValue::Nil {
                    picked.set(key, value)?;
                }
            }
            Ok(picked)
        })?,
    )?;

    module.set(
        "merge",
        lua.create_function(|lua, (base, overlay): (Table, Table)| {
            let merged = lua.create_table()?;
            for pair in base.pairs::<LuaValue, LuaValue>() {
                let (k, v) = pair?;
                merged.set(k, v)?;
            }
            for pair in overlay.pairs::<LuaValue, LuaValue>() {
                let (k, v) = pair?;
                merged.set(k, v)?;
            }
            Ok(merged)
        })?,
    )?;

    module.set(
        "get",
        lua.create_function(
            |_, (source, path, default): (Table, String, LuaValue)| {
                let mut current = LuaValue::Table(source);
                for segment in path.split('.') {
                    let LuaValue::Table(table) = current else {
                        return Ok(default);
                    };
                    current = table.get(segment)?;
                }
                if current == LuaValue::Nil {
                    Ok(default)
                } else {
                    Ok(current)
                }
            },
        )?,
    )?;

    Ok(module)
}

fn dates(lua: &Lua) -> mlua::Result<Table<'_>> {
    let module = lua.create_table()?;

    module.set(
        "format",
        lua.create_function(|_, millis: i64| Ok(text::format_date(millis)))?,
    )?;

    module.set(
        "relative",
        lua.create_function(|_, millis: i64| Ok(text::relative_time(millis, now_millis())))?,
    )?;

    module.set("now", lua.create_function(|_, ()| Ok(now_millis()))?)?;

    Ok(module)
}

fn deep_equal(a: &LuaValue, b: &LuaValue) -> bool {
    match (a, b) {
        (LuaValue::Table(at), LuaValue::Table(bt)) => {
            let mut count_a = 0usize;
            for pair in at.clone().pairs::<LuaValue, LuaValue>() {
                let Ok((key, va)) = pair else { return false };
                count_a += 1;
                let Ok(vb) = bt.get::<_, LuaValue>(key) else {
                    return false;
                };
                if !deep_equal(&va, &vb) {
                    return false;
                }
            }
            let count_b = bt.clone().pairs::<LuaValue, LuaValue>().count();
            count_a == count_b
        }
        _ => a == b,
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lua() -> Lua {
        Lua::new()
    }

    #[test]
    fn unknown_module_is_absent() {
        let lua = lua();
        assert!(build_module(&lua, "fs").unwrap().is_none());
        assert!(build_module(&lua, "toolkit").unwrap().is_some());
    }

    #[test]
    fn toolkit_deep_equal() {
        let lua = lua();
        let module = toolkit(&lua).unwrap();
        lua.globals().set("toolkit", module).unwrap();

        let equal: bool = lua
            .load("return toolkit.deep_equal({a = 1, b = {2, 3}}, {a = 1, b = {2, 3}})")
            .eval()
            .unwrap();
        assert!(equal);

        let unequal: bool = lua
            .load("return toolkit.deep_equal({a = 1}, {a = 1, b = 2})")
            .eval()
            .unwrap();
        assert!(!unequal);
    }

    #[test]
    fn toolkit_pick_and_merge() {
        let lua = lua();
        let module = toolkit(&lua).unwrap();
        lua.globals().set("toolkit", module).unwrap();

        let name: String = lua
            .load("return toolkit.pick({name = 'ada', role = 'admin'}, {'name'}).name")
            .eval()
            .unwrap();
        assert_eq!(name, "ada");

        let merged: i64 = lua
            .load("return toolkit.merge({a = 1, b = 2}, {b = 3}).b")
            .eval()
            .unwrap();
        assert_eq!(merged, 3);
    }

    #[test]
    fn toolkit_get_with_default() {
        let lua = lua();
        let module = toolkit(&lua).unwrap();
        lua.globals().set("toolkit", module).unwrap();

        let hit: i64 = lua
            .load("return toolkit.get({a = {b = {c = 7}}}, 'a.b.c', -1)")
            .eval()
            .unwrap();
        assert_eq!(hit, 7);

        let miss: i64 = lua
            .load("return toolkit.get({a = {}}, 'a.b.c', -1)")
            .eval()
            .unwrap();
        assert_eq!(miss, -1);
    }

    #[test]
    fn dates_format_and_relative() {
        let lua = lua();
        let module = dates(&lua).unwrap();
        lua.globals().set("dates", module).unwrap();

        let formatted: String = lua
            .load("return dates.format(0)")
            .eval()
            .unwrap();
        assert!(formatted.starts_with("1970-01-01"));

        let relative: String = lua.load("return dates.relative(dates.now())").eval().unwrap();
        assert_eq!(relative, "just now");
    }
}
