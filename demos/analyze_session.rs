//! Assess a synthetic session batch and print the analysis record

use scanvox::{EngagementProcessor, EngineConfig};

fn main() {
    let json = r#"{
        "sessionId": "demo-session",
        "timestamp": 1705327200000,
        "screen": { "width": 1920, "height": 1080 },
        "fixations": [
            { "x": 420, "y": 310, "duration": 280 },
            { "x": 980, "y": 320, "duration": 190 },
            { "x": 1460, "y": 700, "duration": 520 }
        ],
        "saccades": [
            { "toX": 980, "toY": 320, "velocity": 310 },
            { "toX": 1460, "toY": 700, "velocity": 420 }
        ],
        "mfccFrames": [
            [-210.4, 88.1, -12.3, 20.5, -5.2, 9.8, -3.1, 4.4, -2.0, 1.7, -0.9, 0.6, -0.2],
            [-205.9, 85.7, -10.8, 19.9, -6.0, 10.2, -2.7, 4.1, -1.6, 1.9, -1.1, 0.4, -0.3],
            [-198.2, 83.0, -11.5, 21.3, -4.8, 9.1, -3.4, 4.8, -2.3, 1.5, -0.7, 0.8, -0.1]
        ],
        "conditions": { "adhd": true, "dyslexia": true },
        "auxiliary": { "gestureScore": 0.55 }
    }"#;

    let processor = match EngagementProcessor::new(EngineConfig::default()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {e}");
            return;
        }
    };

    match processor.assess_json(json) {
        Ok(record) => println!("{record}"),
        Err(e) => eprintln!("Error: {e:?}"),
    }
}
