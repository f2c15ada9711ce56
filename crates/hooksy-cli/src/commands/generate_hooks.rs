//! `hooksy generate-hooks`: print the hook registration block for Claude
//! Code's settings file, wiring every event kind through `hooksy inspect`.

use anyhow::Result;
use serde_json::json;

use hooksy_core::event::HookEventKind;

const EVENT_KINDS: [HookEventKind; 10] = [
    HookEventKind::PreToolUse,
    HookEventKind::PostToolUse,
    HookEventKind::UserPromptSubmit,
    HookEventKind::Stop,
    HookEventKind::SubagentStop,
    HookEventKind::Notification,
    HookEventKind::PreCompact,
    HookEventKind::SessionStart,
    HookEventKind::SessionEnd,
    HookEventKind::PermissionRequest,
];

pub fn run() -> Result<()> {
    let mut hooks = serde_json::Map::new();
    for kind in EVENT_KINDS {
        let name = kind.as_str();
        let entry = json!([{
            "matcher": "",
            "hooks": [{
                "type": "command",
                "command": format!("hooksy inspect --event {name}"),
            }],
        }]);
        hooks.insert(name.to_string(), entry);
    }

    let block = json!({ "hooks": hooks });
    println!("{}", serde_json::to_string_pretty(&block)?);
    println!();
    println!("# Merge the \"hooks\" object above into your Claude Code settings.json.");
    Ok(())
}
