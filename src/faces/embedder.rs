use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Failed to run embedder {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Embedder exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("Malformed embedder output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Inconsistent embedding length: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

/// Face rectangle as pixel offsets, serialized as `[top, right, bottom, left]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl From<[u32; 4]> for BoundingBox {
    fn from([top, right, bottom, left]: [u32; 4]) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }
}

impl From<BoundingBox> for [u32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.top, b.right, b.bottom, b.left]
    }
}

/// One face found by an embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    #[serde(rename = "box")]
    pub bounding_box: BoundingBox,
    pub embedding: Vec<f32>,
}

/// External face detection + embedding capability.
///
/// Implementations must be deterministic for a given file: the thumbnail
/// locator relies on re-running detection to find a face again.
pub trait FaceEmbedder: Send + Sync {
    fn embed_faces(&self, image_path: &Path) -> Result<Vec<DetectedFace>, EmbeddingError>;
}

/// Runs `<program> [args...] <image_path>` and reads a JSON array of
/// `{"box": [top, right, bottom, left], "embedding": [...]}` from stdout.
#[derive(Debug, Clone)]
pub struct CommandEmbedder {
    program: String,
    args: Vec<String>,
}

impl CommandEmbedder {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a full command line; `None` when it is empty.
    pub fn from_command_line(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl FaceEmbedder for CommandEmbedder {
    fn embed_faces(&self, image_path: &Path) -> Result<Vec<DetectedFace>, EmbeddingError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image_path)
            .output()
            .map_err(|source| EmbeddingError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(EmbeddingError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let faces: Vec<DetectedFace> = serde_json::from_slice(&output.stdout)?;
        check_dimensions(&faces)?;
        Ok(faces)
    }
}

/// All embeddings of one image must share a length.
pub fn check_dimensions(faces: &[DetectedFace]) -> Result<(), EmbeddingError> {
    let Some(first) = faces.first() else {
        return Ok(());
    };
    let expected = first.embedding.len();
    match faces.iter().find(|f| f.embedding.len() != expected) {
        Some(face) => Err(EmbeddingError::Dimension {
            expected,
            actual: face.embedding.len(),
        }),
        None => Ok(()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detected_face_json() {
        let faces: Vec<DetectedFace> = serde_json::from_str(
            r#"[{"box": [10, 60, 70, 5], "embedding": [0.25, -0.5]}]"#,
        )
        .unwrap();

        assert_eq!(faces.len(), 1);
        assert_eq!(
            faces[0].bounding_box,
            BoundingBox {
                top: 10,
                right: 60,
                bottom: 70,
                left: 5
            }
        );
        assert_eq!(faces[0].embedding, vec![0.25, -0.5]);

        let value = serde_json::to_value(&faces[0]).unwrap();
        assert_eq!(value["box"], serde_json::json!([10, 60, 70, 5]));
    }

    #[test]
    fn test_check_dimensions() {
        let ok = vec![testing::face(&[0.0, 1.0]), testing::face(&[1.0, 0.0])];
        assert!(check_dimensions(&ok).is_ok());
        assert!(check_dimensions(&[]).is_ok());

        let mixed = vec![testing::face(&[0.0, 1.0]), testing::face(&[1.0])];
        assert!(matches!(
            check_dimensions(&mixed),
            Err(EmbeddingError::Dimension {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_from_command_line() {
        assert!(CommandEmbedder::from_command_line(&[]).is_none());
        let embedder =
            CommandEmbedder::from_command_line(&["python3".to_string(), "embed.py".to_string()])
                .unwrap();
        assert_eq!(embedder.program, "python3");
        assert_eq!(embedder.args, vec!["embed.py"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_embedder_reads_stdout() {
        let embedder = CommandEmbedder::new(
            "sh",
            vec![
                "-c".to_string(),
                r#"echo "[{\"box\": [1, 2, 3, 4], \"embedding\": [0.5]}]""#.to_string(),
                "sh".to_string(),
            ],
        );
        let faces = embedder.embed_faces(Path::new("photo.jpg")).unwrap();
        assert_eq!(faces, vec![DetectedFace {
            bounding_box: BoundingBox::from([1, 2, 3, 4]),
            embedding: vec![0.5],
        }]);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_embedder_failures() {
        let failing = CommandEmbedder::new("sh", vec!["-c".to_string(), "exit 3".to_string()]);
        assert!(matches!(
            failing.embed_faces(Path::new("photo.jpg")),
            Err(EmbeddingError::CommandFailed { .. })
        ));

        let garbage = CommandEmbedder::new("sh", vec!["-c".to_string(), "echo nope".to_string()]);
        assert!(matches!(
            garbage.embed_faces(Path::new("photo.jpg")),
            Err(EmbeddingError::Output(_))
        ));

        let missing = CommandEmbedder::new("/non/existent/embedder", vec![]);
        assert!(matches!(
            missing.embed_faces(Path::new("photo.jpg")),
            Err(EmbeddingError::Spawn { .. })
        ));
    }
}
