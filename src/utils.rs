use crate::track::BBox;

/// Perform non-max suppression on boxes & scores, return indices to keep,
/// highest score first.
pub fn nms(boxes: &[BBox], scores: &[f32], iou_thresh: f32) -> Vec<usize> {
    let mut idxs: Vec<usize> = (0..boxes.len()).collect();
    idxs.sort_unstable_by(|&i, &j| scores[j].total_cmp(&scores[i]));
    let mut keep = Vec::new();
    while let Some(&i) = idxs.first() {
        keep.push(i);
        idxs = idxs
            .into_iter()
            .skip(1)
            .filter(|&j| compute_iou(&boxes[i], &boxes[j]) < iou_thresh)
            .collect();
    }
    keep
}

/// Intersection over union of two corner-form boxes.
pub fn compute_iou(a: &BBox, b: &BBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let a_area = a.width() * a.height();
    let b_area = b.width() * b.height();

    if a_area + b_area - inter_area <= 0.0 {
        return 0.0;
    }

    inter_area / (a_area + b_area - inter_area)
}
