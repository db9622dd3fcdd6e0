//! Request numbering and response correlation.

/// Hands out request numbers 1, 2, … for one connection.
///
/// Zero is never produced; after `i32::MAX` the sequence starts again at 1.
#[derive(Debug, Clone)]
pub struct RequestNumbers {
    next: i32,
}

impl RequestNumbers {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_number(&mut self) -> i32 {
        let number = self.next;
        self.next = if number == i32::MAX { 1 } else { number + 1 };
        number
    }
}

impl Default for RequestNumbers {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `response_number` answers `request_number`.
///
/// Only positive request numbers correlate; 0 never does.
pub fn is_response_to(request_number: i32, response_number: i32) -> bool {
    request_number > 0 && response_number == -request_number
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_starts_at_one() {
        let mut numbers = RequestNumbers::new();
        assert_eq!(numbers.next_number(), 1);
        assert_eq!(numbers.next_number(), 2);
        assert_eq!(numbers.next_number(), 3);
    }

    #[test]
    fn test_wraps_past_max() {
        let mut numbers = RequestNumbers { next: i32::MAX };
        assert_eq!(numbers.next_number(), i32::MAX);
        assert_eq!(numbers.next_number(), 1);
    }

    #[test]
    fn test_correlation() {
        assert!(is_response_to(1, -1));
        assert!(is_response_to(i32::MAX, -i32::MAX));
        assert!(!is_response_to(1, 1));
        assert!(!is_response_to(1, -2));
        assert!(!is_response_to(-1, 1));
        assert!(!is_response_to(0, 0));
    }
}
