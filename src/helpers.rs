use super::*;

pub(super) fn resolve_user_id(input: UserIdInput, config_dir: &Path) -> Result<u64> {
    match input {
        UserIdInput::Number(value) => Ok(value),
        UserIdInput::String(raw) => resolve_user_id_string(&raw, config_dir),
        UserIdInput::File { file } => {
            let path = resolve_config_path(&file, config_dir);
            read_user_id_file(&path)
        }
    }
}

pub(super) fn resolve_user_id_string(raw: &str, config_dir: &Path) -> Result<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("user_id is empty"));
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return parse_user_id_value(trimmed).context("parse user_id");
    }
    let path = resolve_config_path(Path::new(trimmed), config_dir);
    read_user_id_file(&path)
}

pub(super) fn resolve_config_path(path: &Path, config_dir: &Path) -> PathBuf {
    if path.is_relative() {
        config_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

pub(super) fn read_user_id_file(path: &Path) -> Result<u64> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read user_id file {}", path.display()))?;
    parse_user_id_value(contents.trim())
        .with_context(|| format!("parse user_id from {}", path.display()))
}

pub(super) fn parse_user_id_value(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("user_id is empty"));
    }
    trimmed.parse::<u64>().context("parse user_id")
}

pub(super) fn resolve_app_password(bluesky: &BlueskyConfigFile, config_dir: &Path) -> Result<String> {
    if let Some(password) = bluesky.app_password.as_deref() {
        let trimmed = password.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
    let file = bluesky
        .app_password_file
        .as_ref()
        .ok_or_else(|| anyhow!("bluesky.app_password or bluesky.app_password_file is required"))?;
    let path = resolve_config_path(file, config_dir);
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("read app password file {}", path.display()))?;
    let password = contents.trim();
    if password.is_empty() {
        return Err(anyhow!("app password file {} is empty", path.display()));
    }
    Ok(password.to_string())
}

pub(super) fn load_config(path: &Path) -> Result<Config> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    parse_config(&contents, path.parent().unwrap_or_else(|| Path::new(".")))
}

pub(super) fn parse_config(contents: &str, config_dir: &Path) -> Result<Config> {
    let config_file: ConfigFile = toml::from_str(contents).context("parse config")?;
    let user_id = resolve_user_id(config_file.user_id, config_dir)?;
    let app_password = resolve_app_password(&config_file.bluesky, config_dir)?;
    let handle = config_file.bluesky.handle.trim().trim_start_matches('@').to_string();
    if handle.is_empty() {
        return Err(anyhow!("bluesky.handle is empty"));
    }
    let retry_file = config_file.retry.unwrap_or_default();
    let defaults = RetryPolicy::default();
    let retry = RetryPolicy {
        attempts: retry_file.attempts.unwrap_or(defaults.attempts),
        delay: retry_file
            .delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.delay),
    };
    Ok(Config {
        token: config_file.token,
        user_id,
        data_dir: resolve_config_path(&config_file.data_dir, config_dir),
        bluesky: BlueskyConfig {
            handle,
            app_password,
            service_url: config_file
                .bluesky
                .service_url
                .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string()),
            page_size: config_file.bluesky.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        },
        retry,
    })
}

pub(super) fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("no parent dir for {}", path.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    tmp.write_all(data).context("write temp file")?;
    tmp.flush().context("flush temp file")?;
    tmp.as_file_mut().sync_all().context("sync temp file")?;
    tmp.persist(path)
        .map_err(|e| anyhow!("persist temp file: {}", e))?;
    Ok(())
}

pub(super) fn load_session(path: &Path) -> Result<Option<Session>> {
    if !path.exists() {
        return Ok(None);
    }
    let data =
        fs::read_to_string(path).with_context(|| format!("read session {}", path.display()))?;
    let session = serde_json::from_str(&data).context("parse session")?;
    Ok(Some(session))
}

pub(super) fn save_session(path: &Path, session: &Session) -> Result<()> {
    let data = serde_json::to_vec_pretty(session).context("serialize session")?;
    atomic_write(path, &data)
}

pub(super) fn remove_session(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("remove session {}", path.display()))?;
    }
    Ok(())
}

pub(super) async fn connect_bluesky(
    client: &BlueskyClient,
    config: &Config,
    session_path: &Path,
) -> Result<Session> {
    match load_session(session_path) {
        Ok(Some(saved)) => match client.resume(saved).await {
            Ok(session) => return Ok(session),
            Err(err) => warn!("saved session rejected: {}", err),
        },
        Ok(None) => {}
        Err(err) => warn!("ignoring unreadable session file: {:#}", err),
    }
    let session = client
        .login(&config.bluesky.handle, &config.bluesky.app_password)
        .await
        .context("bluesky login")?;
    Ok(session)
}

pub(super) async fn ensure_review(state: &AppState) -> Option<Review> {
    let mut review = state.review.lock().await;
    if let Some(existing) = review.as_ref() {
        return Some(existing.clone());
    }
    let session = state.client.session().await?;
    let context = ReviewContext {
        actor: session.did,
        source: state.client.clone(),
    };
    let created = Review {
        id: short_id(),
        engine: ReviewEngine::new(context, state.config.retry),
    };
    info!("review {} opened for {}", created.id, created.engine.actor());
    *review = Some(created.clone());
    Some(created)
}

pub(super) async fn close_review(state: &AppState) {
    let review = state.review.lock().await.take();
    if let Some(review) = review {
        review.engine.reset().await;
        info!("review {} closed", review.id);
    }
    state.review_messages.lock().await.clear();
}

pub(super) fn filter_marker(enabled: bool) -> &'static str {
    if enabled {
        "[x]"
    } else {
        "[ ]"
    }
}

pub(super) fn counters_line(snapshot: &ReviewSnapshot) -> String {
    format!(
        "Kept: {} | Deleted: {}",
        snapshot.kept_count, snapshot.deleted_count
    )
}

pub(super) fn render_review_view(
    review_id: &str,
    snapshot: &ReviewSnapshot,
) -> (String, InlineKeyboardMarkup) {
    let text = match (&snapshot.current, &snapshot.fetch_error) {
        (Some(post), _) => build_post_text(post, snapshot),
        (None, Some(err)) => format!("{}\n\nUse /reset to start over.\n\n{}", err, counters_line(snapshot)),
        (None, None) if snapshot.queue_exhausted => {
            format!("All posts reviewed!\n\n{}", counters_line(snapshot))
        }
        (None, None) => "Loading posts...".to_string(),
    };
    (text, build_review_keyboard(review_id, snapshot))
}

pub(super) fn build_post_text(post: &Post, snapshot: &ReviewSnapshot) -> String {
    let mut text = String::from("Does this skeet still spark joy?\n\n");
    text.push_str(&format!("{} | {}\n\n", post.kind.label(), post.created_at));
    text.push_str(post.text.trim());
    text.push_str("\n\n");
    text.push_str(&format!(
        "Likes: {} | Reposts: {} | Replies: {}\n",
        post.like_count, post.repost_count, post.reply_count
    ));
    text.push_str(&post.permalink);
    text.push_str("\n\n");
    text.push_str(&counters_line(snapshot));
    if snapshot.remaining > 1 {
        text.push_str(&format!(" | Loaded: {}", snapshot.remaining - 1));
    }
    if let Some(err) = &snapshot.fetch_error {
        text.push_str(&format!("\n\n{}\nUse /reset to start over.", err));
    }
    text
}

pub(super) fn build_review_keyboard(review_id: &str, snapshot: &ReviewSnapshot) -> InlineKeyboardMarkup {
    let filters = snapshot.filters;
    let mut rows = Vec::new();
    if snapshot.current.is_some() {
        rows.push(vec![
            InlineKeyboardButton::callback("Keep", format!("rv:{}:keep", review_id)),
            InlineKeyboardButton::callback("Delete", format!("rv:{}:delete", review_id)),
        ]);
    }
    rows.push(vec![
        InlineKeyboardButton::callback(
            format!("{} Replies", filter_marker(!filters.hide_replies)),
            format!("rv:{}:replies", review_id),
        ),
        InlineKeyboardButton::callback(
            format!("{} Reposts", filter_marker(!filters.hide_reposts)),
            format!("rv:{}:reposts", review_id),
        ),
    ]);
    rows.push(vec![
        InlineKeyboardButton::callback(
            format!("{} 0 Likes", filter_marker(filters.only_zero_likes)),
            format!("rv:{}:zero", review_id),
        ),
        InlineKeyboardButton::callback(
            format!("{} Randomize", filter_marker(filters.randomize)),
            format!("rv:{}:random", review_id),
        ),
    ]);
    rows.push(vec![InlineKeyboardButton::callback(
        "Refresh",
        format!("rv:{}:refresh", review_id),
    )]);
    InlineKeyboardMarkup::new(rows)
}

pub(super) fn toggle_patch(action: &str, filters: FilterConfig) -> Option<FilterPatch> {
    let patch = match action {
        "replies" => FilterPatch {
            hide_replies: Some(!filters.hide_replies),
            ..FilterPatch::default()
        },
        "reposts" => FilterPatch {
            hide_reposts: Some(!filters.hide_reposts),
            ..FilterPatch::default()
        },
        "zero" => FilterPatch {
            only_zero_likes: Some(!filters.only_zero_likes),
            ..FilterPatch::default()
        },
        "random" => FilterPatch {
            randomize: Some(!filters.randomize),
            ..FilterPatch::default()
        },
        _ => return None,
    };
    Some(patch)
}

pub(super) async fn send_or_edit(
    bot: &Bot,
    chat_id: ChatId,
    message_id: Option<MessageId>,
    text: String,
    kb: InlineKeyboardMarkup,
) -> Result<MessageId> {
    if let Some(message_id) = message_id {
        match bot
            .edit_message_text(chat_id, message_id, text.clone())
            .reply_markup(kb.clone())
            .await
        {
            Ok(_) => return Ok(message_id),
            Err(teloxide::RequestError::Api(teloxide::ApiError::MessageNotModified)) => {
                return Ok(message_id);
            }
            Err(err) => warn!("editing review message failed, sending a new one: {}", err),
        }
    }
    let sent = bot.send_message(chat_id, text).reply_markup(kb).await?;
    Ok(sent.id)
}

pub(super) async fn render_review(
    bot: &Bot,
    chat_id: ChatId,
    message_id: Option<MessageId>,
    review: &Review,
) -> Result<MessageId> {
    let snapshot = review.engine.snapshot().await;
    let (text, kb) = render_review_view(&review.id, &snapshot);
    let sent = send_or_edit(bot, chat_id, message_id, text, kb).await;
    if let Some(post) = &snapshot.current {
        review.engine.content_rendered(&post.id).await;
    }
    let mut message_id = sent?;

    if snapshot.current.is_none() && snapshot.is_fetching {
        review.engine.settle().await;
        let snapshot = review.engine.snapshot().await;
        let (text, kb) = render_review_view(&review.id, &snapshot);
        message_id = send_or_edit(bot, chat_id, Some(message_id), text, kb).await?;
        if let Some(post) = &snapshot.current {
            review.engine.content_rendered(&post.id).await;
        }
    }
    Ok(message_id)
}

pub(super) async fn send_ephemeral(bot: &Bot, chat_id: ChatId, text: &str, ttl_secs: u64) -> Result<()> {
    let sent = bot.send_message(chat_id, text).await?;
    let bot = bot.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(ttl_secs)).await;
        let _ = bot.delete_message(chat_id, sent.id).await;
    });
    Ok(())
}

pub(super) async fn send_error(bot: &Bot, chat_id: ChatId, text: &str) -> Result<()> {
    bot.send_message(chat_id, text).await?;
    Ok(())
}

pub(super) fn parse_command(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    if !first.starts_with('/') {
        return None;
    }
    let cmd = first.trim_start_matches('/');
    Some(cmd.split('@').next().unwrap_or(cmd))
}

pub(super) fn short_id() -> String {
    let id = Uuid::new_v4().to_string();
    id.split('-').next().unwrap_or(&id).to_string()
}
