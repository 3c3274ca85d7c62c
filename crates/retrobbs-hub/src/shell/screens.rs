//! Screen text rendered by the shell itself.

use std::sync::Arc;

use retrobbs_shared::schemas::MenuOption;
use retrobbs_shared::text;

use crate::apps::registry::LoadedApp;

const BANNER: &str = r#"
 ____  _____ _____ ____  ___    ____  ____ ____
|  _ \| ____|_   _|  _ \/ _ \  | __ )| __ ) ___|
| |_) |  _|   | | | |_) | | | | |  _ \|  _ \___ \
|  _ <| |___  | | |  _ <| |_| | | |_) | |_) |__) |
|_| \_\_____| |_| |_| \_\\___/  |____/|____/____/
"#;

pub fn menu_options(apps: &[Arc<LoadedApp>]) -> Vec<MenuOption> {
    apps.iter()
        .enumerate()
        .map(|(index, app)| MenuOption {
            number: (index + 1) as u32,
            id: app.meta.id.clone(),
            name: app.meta.name.clone(),
            description: text::truncate(&app.meta.description, 80),
        })
        .collect()
}

/// The main menu; also the default welcome text (it carries the
/// "MAIN MENU" header clients look for).
pub fn main_menu(apps: &[Arc<LoadedApp>], username: Option<&str>) -> String {
    let mut out = text::ascii_boxed_title("MAIN MENU");
    out.push('\n');

    match username {
        Some(name) => out.push_str(&format!("\nWelcome back, {name}.\n")),
        None => out.push_str("\nYou are browsing as a guest. LOGIN is available on the web side.\n"),
    }

    if apps.is_empty() {
        out.push_str("\nNo apps are installed yet. Ask the sysop to add some.\n");
    } else {
        out.push('\n');
        for option in menu_options(apps) {
            out.push_str(&format!(
                "  [{}] {} - {}\n",
                option.number, option.name, option.description
            ));
        }
    }

    out.push('\n');
    out.push_str(&text::separator('=', 48));
    out.push_str("\nType a number to enter an app. HELP lists commands.\n");
    out
}

pub fn full_welcome(apps: &[Arc<LoadedApp>], username: Option<&str>) -> String {
    format!(
        "{BANNER}\n      serving callers since 1986 (emulated)\n\n{}",
        main_menu(apps, username)
    )
}

pub fn simple_welcome(apps: &[Arc<LoadedApp>]) -> String {
    let mut out = String::from("RETRO BBS - MAIN MENU\n");
    for option in menu_options(apps) {
        out.push_str(&format!("[{}] {}\n", option.number, option.name));
    }
    out.push_str("Type a number to enter an app. HELP lists commands.\n");
    out
}

pub fn logoff_text(username: Option<&str>) -> String {
    let name = username.unwrap_or("caller");
    format!(
        "{}\n\nCarrier dropped. Come back soon, {name}.\nNO CARRIER\n",
        text::separator('=', 48)
    )
}

pub fn shell_help(in_app: Option<&str>) -> String {
    let mut out = String::from("UNIVERSAL COMMANDS\n");
    out.push_str("  HELP             this text\n");
    out.push_str("  MAIN / MENU      back to the main menu\n");
    out.push_str("  EXIT / QUIT / X  log off\n");
    out.push_str("  DEBUG            registry dump\n");
    match in_app {
        Some(app_id) => {
            out.push_str(&format!("  B / BACK         leave {app_id}\n"));
        }
        None => {
            out.push_str("  <number>         enter the Nth app from the menu\n");
        }
    }
    out.push_str("\nSYSOP COMMANDS\n");
    out.push_str("  INSTALL GITHUB <url>\n");
    out.push_str("  UNINSTALL GITHUB <url>\n");
    out.push_str("  LIST GITHUB APPS\n");
    out.push_str("  REFRESH GITHUB APPS\n");
    out
}

pub fn unknown_command(app_count: usize) -> String {
    if app_count == 0 {
        "Unknown command. No apps are installed; HELP lists what works here.".to_string()
    } else {
        format!("Unknown command. Select 1..{app_count} to enter an app, or HELP.")
    }
}

pub fn debug_dump(
    apps: &[Arc<LoadedApp>],
    session_check: &serde_json::Value,
    session_count: i64,
    user_count: i64,
) -> String {
    let mut out = text::ascii_boxed_title("REGISTRY DUMP");
    out.push('\n');
    if apps.is_empty() {
        out.push_str("\n(no apps loaded)\n");
    }
    for (index, app) in apps.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. {} v{} [{}]\n   {}\n",
            index + 1,
            app.meta.id,
            app.meta.version,
            app.meta.origin_label(),
            text::truncate(&app.meta.description, 70),
        ));
    }
    out.push('\n');
    out.push_str(&text::separator('-', 48));
    out.push_str(&format!(
        "\nsessions: {session_count}  users: {user_count}\nthis session: {}\n",
        serde_json::to_string_pretty(session_check).unwrap_or_else(|_| "{}".to_string())
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::contract::test_support::EchoApp;
    use crate::apps::contract::BbsApp;
    use crate::apps::rate_limit::RateLimiter;

    fn loaded(id: &str) -> Arc<LoadedApp> {
        let app = EchoApp::new(id);
        Arc::new(LoadedApp {
            meta: app.meta().clone(),
            handler: Arc::new(app),
            limiter: Arc::new(RateLimiter::new(id)),
            installed_at: 0,
            refreshed_at: 0,
        })
    }

    #[test]
    fn main_menu_contains_header_and_options() {
        let apps = vec![loaded("boards"), loaded("hangman")];
        let menu = main_menu(&apps, Some("ada"));
        assert!(menu.contains("MAIN MENU"));
        assert!(menu.contains("[1] boards app"));
        assert!(menu.contains("[2] hangman app"));
        assert!(menu.contains("ada"));
    }

    #[test]
    fn empty_menu_says_so() {
        let menu = main_menu(&[], None);
        assert!(menu.contains("No apps are installed"));
        assert!(menu.contains("guest"));
    }

    #[test]
    fn menu_options_are_numbered_in_order() {
        let apps = vec![loaded("a"), loaded("b"), loaded("c")];
        let options = menu_options(&apps);
        assert_eq!(options.len(), 3);
        assert_eq!(options[0].number, 1);
        assert_eq!(options[2].id, "c");
    }

    #[test]
    fn unknown_command_guides_selection() {
        assert!(unknown_command(3).contains("1..3"));
        assert!(unknown_command(0).contains("No apps"));
    }
}
