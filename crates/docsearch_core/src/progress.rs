/// Converts bytes handed to the transport into a 0–100 percentage that never
/// decreases and never repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    total: u64,
    sent: u64,
    last_percent: Option<u8>,
}

impl UploadProgress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            sent: 0,
            last_percent: None,
        }
    }

    /// Records `bytes` more sent. Returns the new percentage when it moved.
    pub fn advance(&mut self, bytes: u64) -> Option<u8> {
        self.sent = self.sent.saturating_add(bytes).min(self.total);
        self.report(self.percent())
    }

    /// Starts counting bytes again (a retried upload) without forgetting the
    /// highest percentage already reported.
    pub fn restart(&mut self) {
        self.sent = 0;
    }

    /// Forces 100%, used once the server has acknowledged the upload.
    pub fn complete(&mut self) -> Option<u8> {
        self.sent = self.total;
        self.report(100)
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.sent.saturating_mul(100)) / self.total).min(100) as u8
    }

    fn report(&mut self, percent: u8) -> Option<u8> {
        match self.last_percent {
            Some(last) if percent <= last => None,
            _ => {
                self.last_percent = Some(percent);
                Some(percent)
            }
        }
    }
}
