use super::*;

const HELP_TEXT: &str = "Review your old Bluesky posts one at a time. Commands: /review to open the review card, /reset to start over from the newest post, /stats for counters, /login and /logout to manage the Bluesky session. On the card, Keep moves on and Delete removes the post from Bluesky. Replies and Reposts are shown while checked; 0 Likes shows only posts nobody liked; Randomize shuffles the order.";

pub(super) async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> Result<()> {
    let user_id = match msg.from() {
        Some(user) => user.id.0,
        None => return Ok(()),
    };

    if user_id != state.config.user_id {
        return Ok(());
    }

    let text = match msg.text() {
        Some(text) => text.to_string(),
        None => return Ok(()),
    };

    match parse_command(&text) {
        Some("start") | Some("help") => {
            bot.send_message(msg.chat.id, HELP_TEXT).await?;
        }
        Some("review") => handle_review_command(bot, msg, state).await?,
        Some("reset") => handle_reset_command(bot, msg, state).await?,
        Some("stats") => handle_stats_command(bot, msg, state).await?,
        Some("login") => handle_login_command(bot, msg, state).await?,
        Some("logout") => handle_logout_command(bot, msg, state).await?,
        _ => {
            send_ephemeral(&bot, msg.chat.id, "Use /review to start reviewing.", ACK_TTL_SECS)
                .await?;
        }
    }

    Ok(())
}

async fn handle_review_command(bot: Bot, msg: Message, state: Arc<AppState>) -> Result<()> {
    let Some(review) = ensure_review(&state).await else {
        send_error(&bot, msg.chat.id, "Not logged in to Bluesky. Use /login.").await?;
        return Ok(());
    };

    let loading = bot.send_message(msg.chat.id, "Loading posts...").await?;
    if let Err(err) = review.engine.start().await {
        warn!("initial fetch failed: {}", err);
    }
    let message_id = render_review(&bot, msg.chat.id, Some(loading.id), &review).await?;
    state
        .review_messages
        .lock()
        .await
        .insert(msg.chat.id.0, message_id);
    Ok(())
}

async fn handle_reset_command(bot: Bot, msg: Message, state: Arc<AppState>) -> Result<()> {
    let Some(review) = ensure_review(&state).await else {
        send_error(&bot, msg.chat.id, "Not logged in to Bluesky. Use /login.").await?;
        return Ok(());
    };

    review.engine.reset().await;
    let previous = state.review_messages.lock().await.remove(&msg.chat.id.0);
    if let Some(message_id) = previous {
        let _ = bot.delete_message(msg.chat.id, message_id).await;
    }

    let loading = bot.send_message(msg.chat.id, "Starting over...").await?;
    if let Err(err) = review.engine.start().await {
        warn!("refetch after reset failed: {}", err);
    }
    let message_id = render_review(&bot, msg.chat.id, Some(loading.id), &review).await?;
    state
        .review_messages
        .lock()
        .await
        .insert(msg.chat.id.0, message_id);
    Ok(())
}

async fn handle_stats_command(bot: Bot, msg: Message, state: Arc<AppState>) -> Result<()> {
    let review = state.review.lock().await.clone();
    let Some(review) = review else {
        send_ephemeral(&bot, msg.chat.id, "No review in progress.", ACK_TTL_SECS).await?;
        return Ok(());
    };
    let snapshot = review.engine.snapshot().await;
    let mut text = counters_line(&snapshot);
    text.push_str(&format!("\nLoaded and not yet reviewed: {}", snapshot.remaining));
    if snapshot.is_fetching {
        text.push_str("\nFetching more posts...");
    }
    if snapshot.post_loading {
        text.push_str("\nCurrent post is still rendering.");
    }
    if let Some(err) = &snapshot.fetch_error {
        text.push_str(&format!("\n{}", err));
    }
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_login_command(bot: Bot, msg: Message, state: Arc<AppState>) -> Result<()> {
    close_review(&state).await;
    let result = state
        .client
        .login(&state.config.bluesky.handle, &state.config.bluesky.app_password)
        .await;
    match result {
        Ok(session) => {
            bot.send_message(msg.chat.id, format!("Logged in as @{}.", session.handle))
                .await?;
        }
        Err(err) => {
            error!("bluesky login failed: {}", err);
            send_error(&bot, msg.chat.id, "Login failed. Check the handle and app password.")
                .await?;
        }
    }
    Ok(())
}

async fn handle_logout_command(bot: Bot, msg: Message, state: Arc<AppState>) -> Result<()> {
    close_review(&state).await;
    state.client.logout().await;
    remove_session(&state.session_path)?;
    info!("logged out");
    bot.send_message(msg.chat.id, "Logged out.").await?;
    Ok(())
}
