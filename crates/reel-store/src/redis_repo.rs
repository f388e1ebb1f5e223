//! Redis-backed repository.
//!
//! Layout under the configured prefix:
//! - `<prefix>:video:<id>` hash with one field per record attribute
//! - `<prefix>:video:<id>:parts` hash of part id to part JSON
//!
//! Status transitions run as one Lua script so the status check and the
//! field writes cannot interleave with another worker.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, warn};

use reel_models::{StatusUpdate, TransitionError, VideoId, VideoPart, VideoRecord, VideoStatus};

use crate::error::{StoreError, StoreResult};
use crate::repository::{sort_parts, VideoRepository};

/// KEYS[1] record hash.
/// ARGV: target status, last_modified, replay job id (or empty), allowed source
/// count, allowed sources..., set pair count, field/value pairs..., cleared fields...
///
/// Returns `{1, status}` when applied, `{2, status}` when the record already
/// holds the target status from the same job, `{0, ""}` when the record does
/// not exist and `{-1, current}` when the current status is not an allowed source.
static TRANSITION_SCRIPT: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r#"
local current = redis.call('HGET', KEYS[1], 'status')
if not current then
  return {0, ''}
end
if current == ARGV[1] and ARGV[3] ~= '' and redis.call('HGET', KEYS[1], 'job_id') == ARGV[3] then
  return {2, current}
end
local n_allowed = tonumber(ARGV[4])
local allowed = false
for i = 1, n_allowed do
  if ARGV[4 + i] == current then
    allowed = true
  end
end
if not allowed then
  return {-1, current}
end
local idx = 5 + n_allowed
local n_set = tonumber(ARGV[idx])
idx = idx + 1
for i = 1, n_set do
  redis.call('HSET', KEYS[1], ARGV[idx], ARGV[idx + 1])
  idx = idx + 2
end
while idx <= #ARGV do
  redis.call('HDEL', KEYS[1], ARGV[idx])
  idx = idx + 1
end
redis.call('HSET', KEYS[1], 'status', ARGV[1], 'last_modified', ARGV[2])
return {1, ARGV[1]}
"#,
    )
});

/// Record repository on a Redis server.
pub struct RedisVideoRepository {
    client: redis::Client,
    prefix: String,
}

impl RedisVideoRepository {
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
        })
    }

    fn video_key(&self, id: &VideoId) -> String {
        format!("{}:video:{}", self.prefix, id)
    }

    fn parts_key(&self, id: &VideoId) -> String {
        format!("{}:video:{}:parts", self.prefix, id)
    }

    async fn conn(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Script arguments for `update`, in the order the script reads them.
pub fn transition_args(update: &StatusUpdate) -> Vec<String> {
    let allowed = update.status.allowed_sources();
    let set = update.set_fields();

    let mut args = vec![
        update.status.as_str().to_string(),
        format_time(&update.at),
        update.job_id.clone().unwrap_or_default(),
        allowed.len().to_string(),
    ];
    args.extend(allowed.iter().map(|s| s.as_str().to_string()));
    args.push(set.len().to_string());
    for (field, value) in set {
        args.push(field.as_str().to_string());
        args.push(value.to_string());
    }
    args.extend(update.cleared_fields().iter().map(|f| f.as_str().to_string()));
    args
}

/// Flatten a record into hash fields, skipping unset optionals.
pub fn record_to_fields(record: &VideoRecord) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("video_id", record.video_id.to_string()),
        ("video_title", record.video_title.clone()),
        ("status", record.status.as_str().to_string()),
        ("created_at", format_time(&record.created_at)),
        ("last_modified", format_time(&record.last_modified)),
    ];
    let optional = [
        ("job_id", &record.job_id),
        ("output_location", &record.output_location),
        ("error_reason", &record.error_reason),
        ("result_duration", &record.result_duration),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            fields.push((name, value.clone()));
        }
    }
    fields
}

/// Rebuild a record from its hash fields.
pub fn record_from_fields(
    key: &str,
    id: &VideoId,
    mut fields: HashMap<String, String>,
) -> StoreResult<VideoRecord> {
    let status = match fields.remove("status") {
        Some(s) => s
            .parse::<VideoStatus>()
            .map_err(|e| StoreError::corrupt(key, e))?,
        None => VideoStatus::Created,
    };
    let parse_time = |value: Option<String>, name: &str| -> StoreResult<DateTime<Utc>> {
        match value {
            Some(v) => DateTime::parse_from_rfc3339(&v)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| StoreError::corrupt(key, format!("{}: {}", name, e))),
            None => Ok(Utc::now()),
        }
    };
    let created_at = parse_time(fields.remove("created_at"), "created_at")?;
    let last_modified = parse_time(fields.remove("last_modified"), "last_modified")?;

    Ok(VideoRecord {
        video_id: id.clone(),
        video_title: fields.remove("video_title").unwrap_or_default(),
        status,
        job_id: fields.remove("job_id"),
        output_location: fields.remove("output_location"),
        error_reason: fields.remove("error_reason"),
        result_duration: fields.remove("result_duration"),
        created_at,
        last_modified,
    })
}

#[async_trait]
impl VideoRepository for RedisVideoRepository {
    async fn get_video(&self, id: &VideoId) -> StoreResult<Option<VideoRecord>> {
        let key = self.video_key(id);
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        record_from_fields(&key, id, fields).map(Some)
    }

    async fn list_parts(&self, id: &VideoId) -> StoreResult<Vec<VideoPart>> {
        let key = self.parts_key(id);
        let mut conn = self.conn().await?;
        let raw: HashMap<String, String> = conn.hgetall(&key).await?;

        let mut parts = Vec::with_capacity(raw.len());
        for (part_id, json) in raw {
            match serde_json::from_str::<VideoPart>(&json) {
                Ok(part) => parts.push(part),
                Err(e) => {
                    warn!(key = %key, part_id = %part_id, "Unparsable part: {}", e);
                    return Err(StoreError::corrupt(key, format!("part {}: {}", part_id, e)));
                }
            }
        }
        sort_parts(&mut parts);
        Ok(parts)
    }

    async fn apply(&self, id: &VideoId, update: &StatusUpdate) -> StoreResult<()> {
        let key = self.video_key(id);
        let mut conn = self.conn().await?;

        let mut invocation = TRANSITION_SCRIPT.key(&key);
        for arg in transition_args(update) {
            invocation.arg(arg);
        }
        let (code, current): (i64, String) = invocation.invoke_async(&mut conn).await?;

        match code {
            1 => {
                debug!(video_id = %id, status = %update.status, "Status transition applied");
                Ok(())
            }
            2 => {
                debug!(video_id = %id, status = %update.status, "Status transition already applied");
                Ok(())
            }
            0 => Err(StoreError::not_found(id.as_str())),
            _ => {
                let from = current
                    .parse::<VideoStatus>()
                    .map_err(|e| StoreError::corrupt(&key, e))?;
                Err(TransitionError {
                    from,
                    to: update.status,
                }
                .into())
            }
        }
    }

    async fn put_video(&self, record: &VideoRecord) -> StoreResult<()> {
        let key = self.video_key(&record.video_id);
        let fields = record_to_fields(record);
        let mut conn = self.conn().await?;
        redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, fields.as_slice())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn put_part(&self, part: &VideoPart) -> StoreResult<()> {
        let key = self.parts_key(&part.video_id);
        let payload = serde_json::to_string(part)?;
        let mut conn = self.conn().await?;
        conn.hset::<_, _, _, ()>(&key, &part.video_parts_id, payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_args_for_processing() {
        let update = StatusUpdate::processing("job-7");
        let args = transition_args(&update);

        assert_eq!(args[0], "processing");
        assert_eq!(args[1], format_time(&update.at));
        assert_eq!(
            &args[2..],
            &[
                "job-7",
                "1",
                "queued",
                "1",
                "job_id",
                "job-7",
                "error_reason",
                "output_location",
                "result_duration",
            ]
        );
    }

    #[test]
    fn test_transition_args_for_failed() {
        let args = transition_args(&StatusUpdate::failed("Output file was not created"));
        assert_eq!(
            &args[2..],
            &[
                "",
                "2",
                "queued",
                "processing",
                "1",
                "error_reason",
                "Output file was not created",
                "output_location",
                "result_duration",
            ]
        );
    }

    #[test]
    fn test_transition_args_carry_job_for_terminal_writes() {
        let update = StatusUpdate::completed("/out/a_v1.mp4", "00:00:04").for_job("job-7");
        let args = transition_args(&update);
        assert_eq!(args[2], "job-7");
        assert_eq!(&args[3..5], &["1", "processing"]);
        assert_eq!(&args[5..8], &["3", "job_id", "job-7"]);
    }

    #[test]
    fn test_record_fields_round_trip() {
        let id = VideoId::from("v1");
        let mut record = VideoRecord::new(id.clone(), "Summer");
        record.apply(&StatusUpdate::queued("job-1")).unwrap();
        record.apply(&StatusUpdate::processing("job-1")).unwrap();
        record
            .apply(&StatusUpdate::completed("/out/Summer_v1.mp4", "00:00:12"))
            .unwrap();

        let fields: HashMap<String, String> = record_to_fields(&record)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert!(!fields.contains_key("error_reason"));

        let decoded = record_from_fields("reel:video:v1", &id, fields).unwrap();
        assert_eq!(decoded.status, VideoStatus::Completed);
        assert_eq!(decoded.output_location.as_deref(), Some("/out/Summer_v1.mp4"));
        assert_eq!(decoded.result_duration.as_deref(), Some("00:00:12"));
        assert_eq!(decoded.video_title, "Summer");
        assert_eq!(
            decoded.last_modified.timestamp_millis(),
            record.last_modified.timestamp_millis()
        );
    }

    #[test]
    fn test_unknown_status_is_corrupt() {
        let fields = HashMap::from([("status".to_string(), "exploded".to_string())]);
        let err = record_from_fields("reel:video:v1", &VideoId::from("v1"), fields).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
