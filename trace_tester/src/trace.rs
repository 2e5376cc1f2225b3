// Recorded sample traces.
//
// One frame per line: `timestamp,value,confidence[,size[,x]]`, followed by any number
// of secondary landmarks written as `lm<ID>=<value>/<visibility>`. Empty optional
// columns are allowed (`0.1,0.5,0.9,,320`). Blank lines, `#` comments and a header
// line starting with `timestamp` are skipped.

use anyhow::{Context, Result, anyhow, bail};
use rep_vision::{AuxLandmark, AuxLandmarks, LandmarkId, Sample};

#[derive(Debug, Clone, PartialEq)]
pub struct TraceFrame {
    pub sample: Sample,
    pub aux: Option<AuxLandmarks>,
}

pub fn parse_trace(text: &str) -> Result<Vec<TraceFrame>> {
    let mut frames = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if let Some(frame) = parse_line(line).with_context(|| format!("line {}", index + 1))? {
            frames.push(frame);
        }
    }
    Ok(frames)
}

pub fn parse_line(line: &str) -> Result<Option<TraceFrame>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with("timestamp") {
        return Ok(None);
    }

    let mut positional = Vec::new();
    let mut aux = AuxLandmarks::new();
    for field in line.split(',').map(str::trim) {
        match field.strip_prefix("lm") {
            Some(landmark) if field.contains('=') => {
                let (id, reading) = parse_landmark(landmark)?;
                aux.insert(id, reading);
            }
            _ => positional.push(field),
        }
    }

    if positional.len() < 3 {
        bail!("expected at least timestamp, value and confidence");
    }
    let number = |column: &str, text: &str| -> Result<f64> {
        text.parse::<f64>().with_context(|| format!("invalid {column} `{text}`"))
    };
    let optional = |column: &str, index: usize| -> Result<Option<f64>> {
        match positional.get(index) {
            Some(text) if !text.is_empty() => number(column, text).map(Some),
            _ => Ok(None),
        }
    };

    let mut sample = Sample::new(
        number("value", positional[1])?,
        number("timestamp", positional[0])?,
        number("confidence", positional[2])?,
    );
    if let Some(size) = optional("size", 3)? {
        sample = sample.with_size(size);
    }
    if let Some(x) = optional("x", 4)? {
        sample = sample.with_horizontal(x);
    }

    Ok(Some(TraceFrame {
        sample,
        aux: (!aux.is_empty()).then_some(aux),
    }))
}

fn parse_landmark(field: &str) -> Result<(LandmarkId, AuxLandmark)> {
    let (id, reading) = field
        .split_once('=')
        .ok_or_else(|| anyhow!("landmark `{field}` is missing `=`"))?;
    let (value, visibility) = reading
        .split_once('/')
        .ok_or_else(|| anyhow!("landmark `{field}` must be written as lm<ID>=<value>/<visibility>"))?;
    let id: LandmarkId = id.parse().with_context(|| format!("invalid landmark id `{id}`"))?;
    let value: f64 = value.parse().with_context(|| format!("invalid value for landmark {id}"))?;
    let visibility: f64 = visibility
        .parse()
        .with_context(|| format!("invalid visibility for landmark {id}"))?;
    Ok((id, AuxLandmark::new(value, visibility)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_and_comments_are_skipped() {
        let frames = parse_trace("timestamp,value,confidence\n# warm-up\n\n0.0,0.5,0.9\n").expect("valid trace");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sample.value, 0.5);
        assert!(frames[0].aux.is_none());
    }

    #[test]
    fn optional_columns_and_landmarks() {
        let frame = parse_line("0.1,640,0.8,,320,lm11=0.45/0.99,lm12=0.46/0.2")
            .expect("valid line")
            .expect("not skipped");
        assert_eq!(frame.sample.size, None);
        assert_eq!(frame.sample.horizontal, Some(320.0));
        let aux = frame.aux.expect("landmarks");
        assert_eq!(aux[&11], AuxLandmark::new(0.45, 0.99));
        assert_eq!(aux[&12].visibility, 0.2);
    }

    #[test]
    fn errors_name_the_line() {
        let error = parse_trace("0.0,0.5,0.9\n0.1,oops,0.9\n").expect_err("bad value");
        assert!(format!("{error:#}").contains("line 2"));
        assert!(parse_line("0.0,0.5").is_err());
        assert!(parse_line("0.0,0.5,0.9,lm11=0.4").is_err());
    }
}
