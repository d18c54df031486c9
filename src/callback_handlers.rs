use super::*;

pub(super) async fn handle_callback(bot: Bot, q: CallbackQuery, state: Arc<AppState>) -> Result<()> {
    let user_id = q.from.id.0;
    if user_id != state.config.user_id {
        return Ok(());
    }

    if let Some(data) = q.data.as_deref() {
        if data.starts_with("rv:") {
            handle_review_callback(bot, q, state).await?;
        }
    }

    Ok(())
}

async fn handle_review_callback(bot: Bot, q: CallbackQuery, state: Arc<AppState>) -> Result<()> {
    let Some(message) = q.message.clone() else {
        return Ok(());
    };
    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };
    let mut parts = data.split(':');
    let _ = parts.next();
    let review_id = match parts.next() {
        Some(id) => id.to_string(),
        None => return Ok(()),
    };
    let action = match parts.next() {
        Some(action) => action.to_string(),
        None => return Ok(()),
    };

    let review = state.review.lock().await.clone();
    let Some(review) = review.filter(|review| review.id == review_id) else {
        bot.answer_callback_query(q.id)
            .text("Review session expired. Use /review.")
            .await?;
        return Ok(());
    };

    let chat_id = message.chat.id;
    let mut notice: Option<&str> = None;
    match action.as_str() {
        "keep" => match review.engine.keep().await {
            Ok(_) | Err(ReviewError::NoCurrentPost) => {}
            Err(err) => error!("keep failed: {}", err),
        },
        "delete" => match review.engine.delete().await {
            Ok(_) => notice = Some("Deleted."),
            Err(ReviewError::NoCurrentPost) | Err(ReviewError::Superseded) => {}
            Err(err) => {
                send_error(&bot, chat_id, &format!("Could not delete the post: {}", err)).await?;
            }
        },
        "refresh" => review.engine.pump().await,
        other => {
            let filters = review.engine.snapshot().await.filters;
            if let Some(patch) = toggle_patch(other, filters) {
                if let Err(err) = review.engine.set_filter(patch).await {
                    warn!("filter change left the queue without posts: {}", err);
                }
            }
        }
    }

    let message_id = render_review(&bot, chat_id, Some(message.id), &review).await?;
    state.review_messages.lock().await.insert(chat_id.0, message_id);

    match notice {
        Some(text) => bot.answer_callback_query(q.id).text(text).await?,
        None => bot.answer_callback_query(q.id).await?,
    };
    Ok(())
}
