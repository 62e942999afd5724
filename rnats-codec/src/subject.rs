use crate::error::EncodeError;

#[inline]
fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

fn check_tokens(subject: &str, wildcards: bool) -> bool {
    if subject.is_empty() || subject.contains(is_space) {
        return false;
    }
    let mut tokens = subject.split('.').peekable();
    while let Some(token) = tokens.next() {
        if token.is_empty() {
            return false;
        }
        let is_last = tokens.peek().is_none();
        // wildcards only count as whole tokens, `a*b` is a literal
        match token {
            "*" | ">" if !wildcards => return false,
            ">" if !is_last => return false,
            _ => {}
        }
    }
    true
}

/// Subject usable in `PUB` and as a reply subject: no wildcard tokens.
#[inline]
pub fn is_valid_publish_subject(subject: &str) -> bool {
    check_tokens(subject, false)
}

/// Subject usable in `SUB`: `*` may replace any token, `>` only the last one.
#[inline]
pub fn is_valid_subscribe_subject(subject: &str) -> bool {
    check_tokens(subject, true)
}

#[inline]
pub fn is_valid_queue_name(queue: &str) -> bool {
    !queue.is_empty() && !queue.contains(is_space)
}

pub fn validate_publish_subject(subject: &str) -> Result<(), EncodeError> {
    ensure!(is_valid_publish_subject(subject), EncodeError::InvalidSubject(subject.into()));
    Ok(())
}

pub fn validate_subscribe_subject(subject: &str) -> Result<(), EncodeError> {
    ensure!(is_valid_subscribe_subject(subject), EncodeError::InvalidSubject(subject.into()));
    Ok(())
}

pub fn validate_reply(reply: &str) -> Result<(), EncodeError> {
    ensure!(is_valid_publish_subject(reply), EncodeError::InvalidReply(reply.into()));
    Ok(())
}

pub fn validate_queue(queue: &str) -> Result<(), EncodeError> {
    ensure!(is_valid_queue_name(queue), EncodeError::InvalidQueue(queue.into()));
    Ok(())
}
