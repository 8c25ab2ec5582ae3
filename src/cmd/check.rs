use clipwright::{Compositor, Credentials, RunConfig};

/// Returns `false` when a required tool is missing
pub async fn cmd_check(config: RunConfig) -> bool {
    let credentials = Credentials::from_env(&config.narration);
    let key_env = config.narration.api_key_env.clone();
    let compositor = Compositor::new(config);

    let mut ok = true;
    for (tool, available) in compositor.check_dependencies().await {
        if available {
            println!("✅ {tool}");
        } else {
            println!("❌ {tool} (not found or not runnable)");
            ok = false;
        }
    }

    if credentials.narration_api_key.is_some() {
        println!("✅ {key_env} set");
    } else {
        // only narrated segments need it
        println!("⚠️  {key_env} not set; narrated segments will fail");
    }
    ok
}
