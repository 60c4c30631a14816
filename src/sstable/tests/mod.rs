mod tests_corruption;
