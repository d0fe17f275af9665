//! Reference deck builder.
//!
//! Validates the three payload sections against the shapes the slide
//! templates need, then renders one slide part per section into a stored
//! zip. Validation failures are `[PPT] Data gate failed` rejections; the
//! only non-gate failure is a chart whose value axis collapses to zero.

use std::fmt::Write as _;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::archive::build_stored_zip;
use crate::compact::kind_of;
use crate::sanitize::strip_transient_keys;
use crate::{CONTENT_TYPES_ENTRY, DocgenError, DocumentBuilder, PRESENTATION_ENTRY};

/// Limits enforced by the builder's quality gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeckLimits {
    /// Longest accepted narrative field, in chars.
    pub max_text_chars: usize,
    /// Longest accepted table cell, in chars.
    pub max_cell_chars: usize,
    pub max_table_rows: usize,
    pub max_table_cols: usize,
    pub max_series: usize,
}

impl Default for DeckLimits {
    fn default() -> Self {
        Self {
            max_text_chars: 5_000,
            max_cell_chars: 1_500,
            max_table_rows: 40,
            max_table_cols: 16,
            max_series: 8,
        }
    }
}

/// Builds a minimal presentation archive from validated payload sections.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceDeckBuilder {
    pub limits: DeckLimits,
}

/// A located view into the payload used for validation messages.
#[derive(Debug, Clone)]
struct Node<'a> {
    path: String,
    value: Option<&'a Value>,
}

impl<'a> Node<'a> {
    fn root(name: &str, value: &'a Value) -> Self {
        Self {
            path: name.to_owned(),
            value: Some(value),
        }
    }

    fn get(&self, key: &str) -> Node<'a> {
        Node {
            path: format!("{}.{key}", self.path),
            value: self.value.and_then(|v| v.get(key)),
        }
    }

    fn present(&self) -> Result<&'a Value, DocgenError> {
        self.value
            .ok_or_else(|| DocgenError::data_gate(format!("{} is missing", self.path)))
    }

    fn mismatch(&self, expected: &str, found: &Value) -> DocgenError {
        DocgenError::data_gate(format!(
            "{} expected {expected}, found {}",
            self.path,
            kind_of(found)
        ))
    }

    fn object(&self) -> Result<&'a Map<String, Value>, DocgenError> {
        let value = self.present()?;
        value.as_object().ok_or_else(|| self.mismatch("object", value))
    }

    fn items(&self) -> Result<Vec<Node<'a>>, DocgenError> {
        let value = self.present()?;
        let items = value.as_array().ok_or_else(|| self.mismatch("array", value))?;
        Ok(items
            .iter()
            .enumerate()
            .map(|(index, item)| Node {
                path: format!("{}[{index}]", self.path),
                value: Some(item),
            })
            .collect())
    }

    fn non_empty_items(&self) -> Result<Vec<Node<'a>>, DocgenError> {
        let items = self.items()?;
        if items.is_empty() {
            return Err(DocgenError::data_gate(format!("{} is empty", self.path)));
        }
        Ok(items)
    }

    fn text(&self, limit: usize) -> Result<&'a str, DocgenError> {
        let value = self.present()?;
        let text = value.as_str().ok_or_else(|| self.mismatch("string", value))?;
        if text.trim().is_empty() {
            return Err(DocgenError::data_gate(format!("{} is empty", self.path)));
        }
        let chars = text.chars().count();
        if chars > limit {
            return Err(DocgenError::FieldTooLong {
                path: self.path.clone(),
                limit,
                actual: chars,
            });
        }
        Ok(text)
    }

    fn number(&self) -> Result<f64, DocgenError> {
        let value = self.present()?;
        value.as_f64().ok_or_else(|| self.mismatch("number", value))
    }
}

/// One rendered slide.
#[derive(Debug, Clone, Default)]
struct Slide {
    title: String,
    body: String,
}

impl Slide {
    fn new(title: &str) -> Self {
        Self {
            title: title.to_owned(),
            body: String::new(),
        }
    }

    fn bullet(&mut self, text: &str) {
        let _ = write!(self.body, "<a:p><a:r><a:t>{}</a:t></a:r></a:p>", escape_xml(text));
    }

    fn to_xml(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <p:sld xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" \
             xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\">\
             <p:cSld name=\"{}\"><p:spTree><p:sp><p:txBody>{}</p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
            escape_xml(&self.title),
            self.body
        )
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

impl ReferenceDeckBuilder {
    fn title_slide(&self, scope: &Node<'_>) -> Result<Slide, DocgenError> {
        let limit = self.limits.max_text_chars;
        scope.object()?;
        let industry = scope.get("industry").text(limit)?;
        let project_type = scope.get("projectType").text(limit)?;
        let mut slide = Slide::new(&format!("{industry}: {project_type}"));
        for market in scope.get("targetMarkets").non_empty_items()? {
            slide.bullet(market.text(limit)?);
        }
        slide.bullet(scope.get("clientContext").text(limit)?);
        Ok(slide)
    }

    fn synthesis_slides(&self, synthesis: &Node<'_>) -> Result<Vec<Slide>, DocgenError> {
        let limit = self.limits.max_text_chars;
        synthesis.object()?;
        let mut slides = Vec::new();

        let mut summary = Slide::new("Executive Summary");
        for line in synthesis.get("executiveSummary").non_empty_items()? {
            summary.bullet(line.text(limit)?);
        }
        slides.push(summary);

        let mut insights = Slide::new("Key Insights");
        for insight in synthesis.get("keyInsights").non_empty_items()? {
            insight.object()?;
            let title = insight.get("title").text(limit)?;
            let data = insight.get("data").text(limit)?;
            let implication = insight.get("implication").text(limit)?;
            insights.bullet(&format!("{title}: {data} ({implication})"));
        }
        slides.push(insights);

        let mut competitors = Slide::new("Competitive Landscape");
        for competitor in synthesis.get("competitors").items()? {
            competitor.object()?;
            let name = competitor.get("name").text(limit)?;
            let share = competitor.get("marketShare").text(limit)?;
            competitors.bullet(&format!("{name} ({share})"));
            competitors.bullet(competitor.get("description").text(limit)?);
            for strength in competitor.get("strengths").items()? {
                competitors.bullet(strength.text(limit)?);
            }
        }
        slides.push(competitors);

        let strategy = synthesis.get("entryStrategy");
        strategy.object()?;
        let mut options = Slide::new("Entry Strategy Options");
        for option in strategy.get("options").non_empty_items()? {
            option.object()?;
            let mode = option.get("mode").text(limit)?;
            let timeline = option.get("timeline").text(limit)?;
            let investment = option.get("investment").text(limit)?;
            let risk = option.get("riskLevel").text(limit)?;
            options.bullet(&format!("{mode}: {timeline}, {investment}, risk {risk}"));
            for side in ["pros", "cons"] {
                for point in option.get(side).items()? {
                    options.bullet(point.text(limit)?);
                }
            }
        }
        options.bullet(strategy.get("recommendation").text(limit)?);
        slides.push(options);

        let ratings = synthesis.get("summaryRatings");
        let mut scorecard = Slide::new("Summary Ratings");
        for key in ratings.object()?.keys() {
            let rating = ratings.get(key);
            rating.object()?;
            let score = rating.get("score").number()?;
            if !(0.0..=10.0).contains(&score) {
                return Err(DocgenError::data_gate(format!(
                    "{}.score {score} outside 0..=10",
                    rating.path
                )));
            }
            let rationale = rating.get("rationale").text(limit)?;
            scorecard.bullet(&format!("{key}: {score} ({rationale})"));
        }
        slides.push(scorecard);

        let mut next = Slide::new("Next Steps");
        for step in synthesis.get("nextSteps").non_empty_items()? {
            next.bullet(step.text(limit)?);
        }
        slides.push(next);

        Ok(slides)
    }

    fn policy_slides(&self, policy: &Node<'_>) -> Result<Vec<Slide>, DocgenError> {
        let limit = self.limits.max_text_chars;
        policy.object()?;
        let mut slides = Vec::new();

        let acts_section = policy.get("foundationalActs");
        acts_section.object()?;
        let mut acts = Slide::new(acts_section.get("title").text(limit)?);
        for act in acts_section.get("acts").non_empty_items()? {
            act.object()?;
            let name = act.get("name").text(limit)?;
            let year = act.get("year").number()?;
            acts.bullet(&format!("{name} ({year})"));
            for field in ["requirements", "penalties", "enforcement"] {
                acts.bullet(act.get(field).text(limit)?);
            }
        }
        slides.push(acts);

        let national = policy.get("nationalPolicy");
        national.object()?;
        let mut slide = Slide::new(national.get("title").text(limit)?);
        slide.bullet(national.get("overview").text(limit)?);
        for target in national.get("targets").items()? {
            slide.bullet(target.text(limit)?);
        }
        slides.push(slide);

        let restrictions = policy.get("investmentRestrictions");
        restrictions.object()?;
        let mut slide = Slide::new(restrictions.get("title").text(limit)?);
        slide.bullet(restrictions.get("overview").text(limit)?);
        slide.bullet(restrictions.get("ownershipLimits").text(limit)?);
        slides.push(slide);

        Ok(slides)
    }

    fn chart_slide(&self, section: &Node<'_>, slide: &mut Slide) -> Result<(), DocgenError> {
        let limit = self.limits.max_text_chars;
        let chart = section.get("chartData");
        chart.object()?;
        let categories = chart.get("categories").non_empty_items()?;
        let series = chart.get("series").non_empty_items()?;
        if series.len() > self.limits.max_series {
            return Err(DocgenError::data_gate(format!(
                "{} has {} series (max {})",
                chart.path,
                series.len(),
                self.limits.max_series
            )));
        }
        let stacked = chart
            .get("stacked")
            .value
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut axis_max = 0.0_f64;
        for entry in &series {
            entry.object()?;
            let name = entry.get("name").text(limit)?;
            let values = entry.get("values").non_empty_items()?;
            if values.len() != categories.len() {
                return Err(DocgenError::data_gate(format!(
                    "{}.values has {} points for {} categories",
                    entry.path,
                    values.len(),
                    categories.len()
                )));
            }
            let mut points = Vec::with_capacity(values.len());
            for value in &values {
                let number = value.number()?;
                if !number.is_finite() {
                    return Err(value.mismatch("finite number", value.present()?));
                }
                if stacked && number < 0.0 {
                    return Err(DocgenError::data_gate(format!(
                        "{} is negative in a stacked chart",
                        value.path
                    )));
                }
                axis_max = axis_max.max(number.abs());
                points.push(number.to_string());
            }
            slide.bullet(&format!("{name}: {}", points.join(", ")));
        }

        if axis_max <= 0.0 {
            return Err(DocgenError::render(
                "chart",
                format!("value axis for {} collapsed to zero", chart.path),
            ));
        }
        trace!(path = %chart.path, axis_max, "rendered chart");
        Ok(())
    }

    fn table_slide(&self, section: &Node<'_>, slide: &mut Slide) -> Result<(), DocgenError> {
        let limits = self.limits;
        let table = section.get("tableData");
        table.object()?;
        let headers = table.get("headers").non_empty_items()?;
        if headers.len() > limits.max_table_cols {
            return Err(DocgenError::data_gate(format!(
                "{} has {} columns (max {})",
                table.path,
                headers.len(),
                limits.max_table_cols
            )));
        }
        let rows = table.get("rows").non_empty_items()?;
        if rows.len() > limits.max_table_rows {
            return Err(DocgenError::data_gate(format!(
                "{} has {} rows (max {})",
                table.path,
                rows.len(),
                limits.max_table_rows
            )));
        }
        let header_cells: Vec<&str> = headers
            .iter()
            .map(|h| h.text(limits.max_cell_chars))
            .collect::<Result<_, _>>()?;
        slide.bullet(&header_cells.join(" | "));
        for row in &rows {
            let cells = row.items()?;
            if cells.len() != headers.len() {
                return Err(DocgenError::data_gate(format!(
                    "{} has {} cells for {} columns",
                    row.path,
                    cells.len(),
                    headers.len()
                )));
            }
            let rendered: Vec<&str> = cells
                .iter()
                .map(|c| c.text(limits.max_cell_chars))
                .collect::<Result<_, _>>()?;
            slide.bullet(&rendered.join(" | "));
        }
        Ok(())
    }

    fn market_slides(&self, market: &Node<'_>) -> Result<Vec<Slide>, DocgenError> {
        let limit = self.limits.max_text_chars;
        let mut slides = Vec::new();
        for key in market.object()?.keys() {
            let section = market.get(key);
            section.object()?;
            let mut slide = Slide::new(section.get("title").text(limit)?);
            slide.bullet(section.get("keyInsight").text(limit)?);

            let has_chart = section.get("chartData").value.is_some();
            let has_table = section.get("tableData").value.is_some();
            let chart_usable = section
                .get("chartData")
                .get("series")
                .value
                .and_then(Value::as_array)
                .is_some_and(|s| !s.is_empty());
            match (has_chart, has_table) {
                (true, false) => self.chart_slide(&section, &mut slide)?,
                (true, true) if chart_usable => self.chart_slide(&section, &mut slide)?,
                (_, true) => self.table_slide(&section, &mut slide)?,
                (false, false) => {
                    return Err(DocgenError::data_gate(format!(
                        "{} has neither chartData nor tableData",
                        section.path
                    )));
                }
            }
            slides.push(slide);
        }
        if slides.is_empty() {
            return Err(DocgenError::data_gate(format!("{} is empty", market.path)));
        }
        Ok(slides)
    }

    fn competitor_slides(&self, competitors: &Node<'_>) -> Result<Vec<Slide>, DocgenError> {
        let limit = self.limits.max_text_chars;
        let mut slides = Vec::new();
        for key in competitors.object()?.keys() {
            let group = competitors.get(key);
            group.object()?;
            let mut slide = Slide::new(group.get("title").text(limit)?);
            for player in group.get("players").non_empty_items()? {
                player.object()?;
                let name = player.get("name").text(limit)?;
                let presence = player.get("presence").text(limit)?;
                slide.bullet(&format!("{name} ({presence})"));
                slide.bullet(player.get("description").text(limit)?);
            }
            slides.push(slide);
        }
        Ok(slides)
    }

    fn country_slides(&self, analysis: &Node<'_>) -> Result<Vec<Slide>, DocgenError> {
        let limit = self.limits.max_text_chars;
        analysis.object()?;
        analysis.get("country").text(limit)?;
        let mut slides = self.policy_slides(&analysis.get("policy"))?;
        slides.extend(self.market_slides(&analysis.get("market"))?);
        slides.extend(self.competitor_slides(&analysis.get("competitors"))?);

        let summary = analysis.get("summary");
        summary.object()?;
        let mut slide = Slide::new("Country Summary");
        slide.bullet(summary.get("overview").text(limit)?);
        for side in ["opportunities", "risks"] {
            for point in summary.get(side).items()? {
                slide.bullet(point.text(limit)?);
            }
        }
        slides.push(slide);
        Ok(slides)
    }

    fn package(slides: &[Slide]) -> Result<Vec<u8>, DocgenError> {
        let mut content_types = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
             <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
             <Override PartName=\"/ppt/presentation.xml\" \
             ContentType=\"application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml\"/>",
        );
        let mut slide_ids = String::new();
        for index in 1..=slides.len() {
            let _ = write!(
                content_types,
                "<Override PartName=\"/ppt/slides/slide{index}.xml\" \
                 ContentType=\"application/vnd.openxmlformats-officedocument.presentationml.slide+xml\"/>"
            );
            let _ = write!(
                slide_ids,
                "<p:sldId id=\"{}\" r:id=\"rId{index}\"/>",
                255 + index
            );
        }
        content_types.push_str("</Types>");

        let presentation = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <p:presentation xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\" \
             xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">\
             <p:sldIdLst>{slide_ids}</p:sldIdLst></p:presentation>"
        );

        let mut entries = vec![
            (CONTENT_TYPES_ENTRY.to_owned(), content_types.into_bytes()),
            (
                "_rels/.rels".to_owned(),
                b"<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
                  <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
                  <Relationship Id=\"rId1\" Target=\"ppt/presentation.xml\" \
                  Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\"/>\
                  </Relationships>"
                    .to_vec(),
            ),
            (PRESENTATION_ENTRY.to_owned(), presentation.into_bytes()),
        ];
        for (index, slide) in slides.iter().enumerate() {
            entries.push((
                format!("ppt/slides/slide{}.xml", index + 1),
                slide.to_xml().into_bytes(),
            ));
        }
        build_stored_zip(&entries)
    }
}

impl DocumentBuilder for ReferenceDeckBuilder {
    fn build_document(
        &self,
        synthesis: &Value,
        country_analysis: &Value,
        scope: &Value,
    ) -> Result<Vec<u8>, DocgenError> {
        let mut synthesis = synthesis.clone();
        let mut country_analysis = country_analysis.clone();
        let mut scope = scope.clone();
        let stripped = strip_transient_keys(&mut synthesis)
            + strip_transient_keys(&mut country_analysis)
            + strip_transient_keys(&mut scope);

        let mut slides = vec![self.title_slide(&Node::root("scope", &scope))?];
        slides.extend(self.synthesis_slides(&Node::root("synthesis", &synthesis))?);
        slides.extend(self.country_slides(&Node::root("countryAnalysis", &country_analysis))?);

        let bytes = Self::package(&slides)?;
        debug!(
            slides = slides.len(),
            bytes = bytes.len(),
            stripped_keys = stripped,
            "built deck"
        );
        Ok(bytes)
    }
}
