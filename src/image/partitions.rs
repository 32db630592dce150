//! Parsing of `parted -ms <image> unit B print` output.
//!
//! ```text
//! BYT;
//! /work/pi.img:2147483648B:file:512:512:msdos::;
//! 1:4194304B:272629759B:268435456B:fat32::lba;
//! 2:272629760B:2147483647B:1874853888B:ext4::;
//! ```

use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub number: u32,
    pub start: u64,
    pub end: u64,
    pub size: u64,
    pub filesystem: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    pub disk_bytes: u64,
    pub partitions: Vec<PartitionEntry>,
}

impl PartitionTable {
    pub fn parse(output: &str) -> Result<Self, PipelineError> {
        let mut lines = output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty());

        match lines.next() {
            Some("BYT;") => {}
            other => {
                return Err(PipelineError::PartitionTool(format!(
                    "expected 'BYT;' header, got {:?}",
                    other.unwrap_or("")
                )))
            }
        }

        let disk_line = lines
            .next()
            .ok_or_else(|| PipelineError::PartitionTool("missing disk line".to_string()))?;
        let disk_fields: Vec<&str> = disk_line.trim_end_matches(';').split(':').collect();
        if disk_fields.len() < 2 {
            return Err(PipelineError::PartitionTool(format!(
                "malformed disk line '{disk_line}'"
            )));
        }
        let disk_bytes = parse_bytes(disk_fields[1])?;

        let mut partitions = Vec::new();
        for line in lines {
            let fields: Vec<&str> = line.trim_end_matches(';').split(':').collect();
            if fields.len() < 4 {
                return Err(PipelineError::PartitionTool(format!(
                    "malformed partition line '{line}'"
                )));
            }
            let number = fields[0].parse().map_err(|_| {
                PipelineError::PartitionTool(format!("bad partition number in '{line}'"))
            })?;
            partitions.push(PartitionEntry {
                number,
                start: parse_bytes(fields[1])?,
                end: parse_bytes(fields[2])?,
                size: parse_bytes(fields[3])?,
                filesystem: fields.get(4).copied().unwrap_or("").to_string(),
            });
        }

        Ok(Self {
            disk_bytes,
            partitions,
        })
    }

    pub fn partition(&self, number: u32) -> Option<&PartitionEntry> {
        self.partitions.iter().find(|p| p.number == number)
    }
}

fn parse_bytes(field: &str) -> Result<u64, PipelineError> {
    field
        .strip_suffix('B')
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| PipelineError::PartitionTool(format!("expected byte count, got '{field}'")))
}
