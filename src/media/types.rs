use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Codec field as reported by yt-dlp.
///
/// yt-dlp writes the literal `"none"` when a stream is absent and leaves the
/// field out (or null) when it could not tell. An unknown codec is treated as
/// present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Codec {
    None,
    Named(String),
    #[default]
    Unknown,
}

impl Codec {
    pub fn is_present(&self) -> bool {
        !matches!(self, Codec::None)
    }
}

impl<'de> Deserialize<'de> for Codec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<String>::deserialize(deserializer)? {
            None => Codec::Unknown,
            Some(s) if s == "none" => Codec::None,
            Some(s) => Codec::Named(s),
        })
    }
}

impl Serialize for Codec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Codec::None => serializer.serialize_str("none"),
            Codec::Named(name) => serializer.serialize_str(name),
            Codec::Unknown => serializer.serialize_none(),
        }
    }
}

/// One of the separately delivered streams of a split audio/video format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamFormat {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default, rename = "vcodec")]
    pub video_codec: Codec,
    #[serde(default, rename = "acodec")]
    pub audio_codec: Codec,
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,
}

/// Normalized extraction result for one playable item or a collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub uploader_url: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub extractor_key: Option<String>,
    #[serde(default, rename = "vcodec")]
    pub video_codec: Codec,
    #[serde(default, rename = "acodec")]
    pub audio_codec: Codec,
    #[serde(default, rename = "url")]
    pub primary_url: Option<String>,
    #[serde(
        default,
        rename = "requested_formats",
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub alternate_formats: Vec<StreamFormat>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub http_headers: BTreeMap<String, String>,
    #[serde(
        default,
        deserialize_with = "entries_without_nulls",
        skip_serializing_if = "Option::is_none"
    )]
    pub entries: Option<Vec<MediaDescriptor>>,
}

impl MediaDescriptor {
    pub fn is_collection(&self) -> bool {
        self.entries.is_some()
    }

    pub fn summary(&self) -> InfoSummary {
        InfoSummary {
            title: self.title.clone(),
            uploader: self.uploader.clone(),
            uploader_url: self.uploader_url.clone(),
            webpage_url: self.webpage_url.clone(),
            extractor_key: self.extractor_key.clone(),
            entries: self.entries.as_ref().map(|entries| {
                entries
                    .iter()
                    .map(|entry| EntrySummary {
                        id: entry.id.clone(),
                        title: entry.title.clone(),
                        url: entry
                            .webpage_url
                            .clone()
                            .or_else(|| entry.primary_url.clone()),
                    })
                    .collect()
            }),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<StreamFormat>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<StreamFormat>>::deserialize(deserializer)?.unwrap_or_default())
}

// yt-dlp emits null in place of entries it failed to extract.
fn entries_without_nulls<'de, D>(deserializer: D) -> Result<Option<Vec<MediaDescriptor>>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<Option<MediaDescriptor>>>::deserialize(deserializer)?;
    Ok(entries.map(|entries| entries.into_iter().flatten().collect()))
}

/// Public body of `GET /info`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfoSummary {
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub uploader_url: Option<String>,
    pub webpage_url: Option<String>,
    pub extractor_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<EntrySummary>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntrySummary {
    pub id: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
}
