use crate::data::Direction;

/// How a remote transfer ended, in classification priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The remote peer answered with an HTTP error status.
    RemoteStatus { status: u16, message: String },
    /// Local storage failed or the transfer timed out.
    Local { message: Option<String> },
    /// The HTTP client itself failed.
    Transport { detail: Option<String> },
    Success,
}

impl Outcome {
    /// Pick the outcome from what the loop observed.
    pub fn classify(
        remote_status: Option<u16>,
        remote_message: Option<&str>,
        local_error: Option<&str>,
        transport_error: Option<&str>,
    ) -> Self {
        if let Some(status) = remote_status.filter(|s| *s >= 400) {
            return Outcome::RemoteStatus {
                status,
                message: remote_message.unwrap_or_default().to_string(),
            };
        }
        if let Some(message) = local_error {
            return Outcome::Local {
                message: (!message.is_empty()).then(|| message.to_string()),
            };
        }
        if let Some(detail) = transport_error {
            return Outcome::Transport {
                detail: (!detail.is_empty()).then(|| detail.to_string()),
            };
        }
        Outcome::Success
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Body of the final chunk sent to the client.
    pub fn final_message(&self, local: &str, remote: &str) -> String {
        match self {
            Outcome::RemoteStatus { status, message } => {
                let text = format!(
                    "Remote side failed with status code {status}; error message: \"{}\"",
                    message.replace('\n', " ")
                );
                client_error(&text, local, remote, None)
            }
            Outcome::Local { message } => {
                let text = format!(
                    "Error when interacting with local filesystem: {}",
                    message.as_deref().unwrap_or("(no error message provided)")
                );
                client_error(&text, local, remote, None)
            }
            Outcome::Transport { detail } => {
                client_error("Internal transfer failure", local, remote, detail.as_deref())
            }
            Outcome::Success => "success: Created".to_string(),
        }
    }
}

/// `failure: <msg>, local=<path>, remote=<url>[, HTTP library failure=<text>]`
pub fn client_error(message: &str, local: &str, remote: &str, library: Option<&str>) -> String {
    let mut text = format!("failure: {message}, local={local}, remote={remote}");
    if let Some(library) = library {
        text.push_str(", HTTP library failure=");
        text.push_str(library);
    }
    text
}

/// Local-error text recorded when no bytes moved within the timeout.
pub fn timeout_message(direction: Direction, seconds: u64) -> String {
    match direction {
        Direction::Pull => format!(
            "Transfer failed because no bytes have been received from the source (pull mode) in {seconds} seconds."
        ),
        Direction::Push => format!(
            "Transfer failed because no bytes have been transmitted to the destination (push mode) in {seconds} seconds."
        ),
    }
}
