// Literal control tokens exchanged with the peer
//
// Pings, watchdog control and discovery travel as bare ASCII literals;
// everything else is a signed command packet.

pub const PING: &str = "PING";
pub const PONG: &str = "PONG";

/// Watchdog port commands
pub const START_MAIN_SERVER: &str = "START_MAIN_SERVER";
pub const STOP_MAIN_SERVER: &str = "STOP_MAIN_SERVER";

/// Broadcast probe and its accepted replies
pub const DISCOVERY_REQUEST: &str = "DISCOVERY_REQUEST";
pub const LAPTOP_IP_FOUND: &str = "LAPTOP_IP_FOUND";
pub const LAPTOP_SERVER_ACTIVE: &str = "LAPTOP_SERVER_ACTIVE";

pub const REQUEST_FILE_LIST: &str = "REQUEST_FILE_LIST";
pub const FILE_LIST_PREFIX: &str = "FILE_LIST:";

pub const SYNC_HANDSHAKE_PREFIX: &str = "SYNC_HANDSHAKE:";

/// True when a datagram is a pong reply
pub fn is_pong(reply: &[u8]) -> bool {
    String::from_utf8_lossy(reply).trim() == PONG
}

/// Watchdog command for flipping the main server
pub fn toggle_command(is_running: bool) -> &'static str {
    if is_running {
        STOP_MAIN_SERVER
    } else {
        START_MAIN_SERVER
    }
}

/// Strip `FILE_LIST:` from a reply, `None` for anything else
pub fn strip_file_list(reply: &str) -> Option<&str> {
    reply.trim().strip_prefix(FILE_LIST_PREFIX)
}

/// Shorten a command for log lines
pub fn abbrev(command: &str) -> String {
    const MAX_CHARS: usize = 70;
    if command.chars().count() > MAX_CHARS {
        let head: String = command.chars().take(MAX_CHARS).collect();
        format!("{}…", head)
    } else {
        command.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_pong() {
        assert!(is_pong(b"PONG"));
        assert!(is_pong(b"PONG\n"));
        assert!(!is_pong(b"pong"));
        assert!(!is_pong(b"PING"));
        assert!(!is_pong(&[0xff, 0xfe]));
    }

    #[test]
    fn test_toggle_command() {
        assert_eq!(toggle_command(true), "STOP_MAIN_SERVER");
        assert_eq!(toggle_command(false), "START_MAIN_SERVER");
    }

    #[test]
    fn test_strip_file_list() {
        assert_eq!(strip_file_list("FILE_LIST:a.txt,b.pdf"), Some("a.txt,b.pdf"));
        assert_eq!(strip_file_list("FILE_LIST:"), Some(""));
        assert_eq!(strip_file_list("SYNC_DELTA:{}"), None);
    }

    #[test]
    fn test_abbrev() {
        assert_eq!(abbrev("short"), "short");
        let long = "x".repeat(100);
        let shortened = abbrev(&long);
        assert!(shortened.ends_with('…'));
        assert_eq!(shortened.chars().count(), 71);
    }
}
